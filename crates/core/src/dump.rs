//! Canonical string rendering of mapping sections.
//!
//! Rule patterns that target a mapping section (request, session, ...) are
//! matched against this rendering rather than individual keys, so the output
//! must be byte-stable: keys are sorted at every level regardless of the
//! insertion order of the input. Lists render inline as `["a", "b"]` with
//! the items written verbatim (no escaping).
//!
//! ```text
//! params:
//!   id: 7
//! path: /users
//! ```

use indexmap::IndexMap;

use crate::record::SectionValue;

/// Render a mapping as sorted, indented `key: value` lines.
pub fn dump_mapping(map: &IndexMap<String, SectionValue>) -> String {
    let mut out = String::new();
    dump_into(&mut out, map, 0);
    out
}

fn dump_into(out: &mut String, map: &IndexMap<String, SectionValue>, depth: usize) {
    let mut entries: Vec<(&String, &SectionValue)> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    for (key, value) in entries {
        out.push_str(&" ".repeat(2 * depth));
        out.push_str(key);
        out.push(':');
        match value {
            SectionValue::Map(nested) => {
                out.push('\n');
                dump_into(out, nested, depth + 1);
            }
            SectionValue::Str(s) => {
                out.push(' ');
                out.push_str(s);
                out.push('\n');
            }
            SectionValue::List(items) => {
                out.push_str(" [");
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push('"');
                    out.push_str(item);
                    out.push('"');
                }
                out.push_str("]\n");
            }
            SectionValue::Absent => out.push_str(" \n"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, SectionValue)]) -> IndexMap<String, SectionValue> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn renders_nested_mapping_with_indentation() {
        let params = map(&[("id", "7".into()), ("format", "json".into())]);
        let request = map(&[
            ("path", "/users".into()),
            ("params", SectionValue::Map(params)),
            ("method", "GET".into()),
        ]);

        assert_eq!(
            dump_mapping(&request),
            "method: GET\nparams:\n  format: json\n  id: 7\npath: /users\n"
        );
    }

    #[test]
    fn output_is_stable_under_key_reordering() {
        let a = map(&[
            ("zeta", "1".into()),
            ("alpha", SectionValue::Map(map(&[("b", "2".into()), ("a", "1".into())]))),
        ]);
        let b = map(&[
            ("alpha", SectionValue::Map(map(&[("a", "1".into()), ("b", "2".into())]))),
            ("zeta", "1".into()),
        ]);
        assert_eq!(dump_mapping(&a), dump_mapping(&b));
    }

    #[test]
    fn renders_lists_and_absent_values_inline() {
        let m = map(&[
            ("roles", SectionValue::List(vec!["admin".into(), "ops".into()])),
            ("user", SectionValue::Absent),
        ]);
        assert_eq!(dump_mapping(&m), "roles: [\"admin\", \"ops\"]\nuser: \n");
    }

    #[test]
    fn list_items_are_not_escaped() {
        let m = map(&[(
            "paths",
            SectionValue::List(vec![r#"C:\tmp"#.into(), r#"say "hi""#.into()]),
        )]);
        assert_eq!(dump_mapping(&m), "paths: [\"C:\\tmp\", \"say \"hi\"\"]\n");
    }

    #[test]
    fn empty_mapping_renders_empty() {
        assert_eq!(dump_mapping(&IndexMap::new()), "");
    }
}
