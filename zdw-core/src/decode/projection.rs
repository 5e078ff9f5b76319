//! Column projection: which columns are emitted, and in what order.
//!
//! The caller supplies a comma-separated list of names and an inclusion
//! rule; resolution against the file schema happens once the header has
//! been read. Name matching is ASCII case-insensitive.

use crate::error::{Result, ZdwError};
use crate::types::{VIRTUAL_EXPORT_BASENAME_COLUMN_NAME, VIRTUAL_EXPORT_ROW_COLUMN_NAME};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InclusionRule {
    /// Unknown or duplicate names are errors.
    FailOnInvalid,
    /// Unknown and duplicate names are skipped; surviving positions are
    /// compacted.
    SkipInvalid,
    /// Output everything except the named columns, in file order.
    ExcludeSpecified,
    /// Absent names become empty columns at their requested positions.
    ProvideEmptyMissing,
}

#[derive(Debug, Clone)]
pub struct ColumnSelection {
    rule: InclusionRule,
    /// Requested names in order, deduplicated (case-insensitive).
    names: Vec<String>,
    /// Blank positions created by duplicate requests in pad mode.
    parse_blanks: Vec<(usize, String)>,
}

impl ColumnSelection {
    /// Parse a comma-separated column list (spaces also separate, matching
    /// the historical CLI surface).
    pub fn parse(csv: &str, rule: InclusionRule) -> Result<ColumnSelection> {
        let mut names: Vec<String> = Vec::new();
        let mut seen: Vec<String> = Vec::new();
        let mut parse_blanks = Vec::new();
        let mut index = 0usize;

        for token in csv.split([',', ' ']).filter(|t| !t.is_empty()) {
            let lowered = token.to_ascii_lowercase();
            if seen.contains(&lowered) {
                match rule {
                    InclusionRule::FailOnInvalid => {
                        return Err(ZdwError::BadRequestedColumn(token.to_string()))
                    }
                    InclusionRule::ProvideEmptyMissing => {
                        parse_blanks.push((index, token.to_string()));
                        index += 1;
                    }
                    _ => {}
                }
                continue;
            }
            seen.push(lowered);
            names.push(token.to_string());
            index += 1;
        }

        Ok(ColumnSelection {
            rule,
            names,
            parse_blanks,
        })
    }

    pub fn rule(&self) -> InclusionRule {
        self.rule
    }

    /// Virtual columns join the schema only when named explicitly, never in
    /// exclude mode.
    pub fn enables_virtual_basename(&self) -> bool {
        self.rule != InclusionRule::ExcludeSpecified
            && self.names.iter().any(|n| n == VIRTUAL_EXPORT_BASENAME_COLUMN_NAME)
    }

    pub fn enables_virtual_row(&self) -> bool {
        self.rule != InclusionRule::ExcludeSpecified
            && self.names.iter().any(|n| n == VIRTUAL_EXPORT_ROW_COLUMN_NAME)
    }

    /// Resolve the selection against the file's column names (virtual
    /// columns already appended, when enabled).
    pub fn resolve(&self, column_names: &[String]) -> Result<ResolvedProjection> {
        let mut output_columns = vec![-1i32; column_names.len()];
        let mut blank_columns: BTreeMap<usize, String> = BTreeMap::new();
        for (pos, name) in &self.parse_blanks {
            blank_columns.insert(*pos, name.clone());
        }

        // requested lowercase name -> requested position, consumed on match
        let mut pending: BTreeMap<String, usize> = self
            .names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.to_ascii_lowercase(), i))
            .collect();
        // duplicates in pad mode occupy positions; account for the shift
        let position_of = |i: usize, blanks: &[(usize, String)]| -> usize {
            let mut pos = i;
            for (bpos, _) in blanks {
                if *bpos <= pos {
                    pos += 1;
                }
            }
            pos
        };

        if self.rule == InclusionRule::ExcludeSpecified {
            let mut out = 0usize;
            for (c, name) in column_names.iter().enumerate() {
                if !pending.contains_key(&name.to_ascii_lowercase()) {
                    output_columns[c] = out as i32;
                    out += 1;
                }
            }
            if out == 0 {
                return Err(ZdwError::NoColumnsToOutput);
            }
            return Ok(ResolvedProjection {
                output_columns,
                blank_columns,
                num_positions: out,
            });
        }

        // position -> file column, for gap compaction in skip mode
        let mut encountered: BTreeMap<usize, usize> = BTreeMap::new();
        for (c, name) in column_names.iter().enumerate() {
            if let Some(i) = pending.remove(&name.to_ascii_lowercase()) {
                let pos = position_of(i, &self.parse_blanks);
                output_columns[c] = pos as i32;
                encountered.insert(pos, c);
            }
        }

        if !pending.is_empty() {
            match self.rule {
                InclusionRule::FailOnInvalid => {
                    let name = pending.keys().next().cloned().unwrap_or_default();
                    return Err(ZdwError::BadRequestedColumn(name));
                }
                InclusionRule::ProvideEmptyMissing => {
                    for &i in pending.values() {
                        let pos = position_of(i, &self.parse_blanks);
                        blank_columns.insert(pos, self.names[i].clone());
                    }
                }
                InclusionRule::SkipInvalid => {
                    if encountered.is_empty() {
                        return Err(ZdwError::NoColumnsToOutput);
                    }
                    // compact position gaps left by skipped names
                    for (next, (&pos, &c)) in encountered.iter().enumerate() {
                        if pos != next {
                            output_columns[c] = next as i32;
                        }
                    }
                }
                InclusionRule::ExcludeSpecified => unreachable!(),
            }
        }

        let num_positions = output_columns
            .iter()
            .filter(|&&p| p >= 0)
            .count()
            + blank_columns.len();
        debug_assert!(
            output_columns
                .iter()
                .filter(|&&p| p >= 0)
                .map(|&p| p as usize)
                .chain(blank_columns.keys().copied())
                .max()
                .map_or(true, |max| max + 1 == num_positions),
            "projection positions must be contiguous"
        );

        Ok(ResolvedProjection {
            output_columns,
            blank_columns,
            num_positions,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedProjection {
    /// Per file column: output position, or -1 to ignore.
    pub output_columns: Vec<i32>,
    /// Output position -> requested name, for padded absent columns.
    pub blank_columns: BTreeMap<usize, String>,
    pub num_positions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn strict_reorder() {
        let sel = ColumnSelection::parse("c,a", InclusionRule::FailOnInvalid).unwrap();
        let r = sel.resolve(&cols(&["a", "b", "c"])).unwrap();
        assert_eq!(r.output_columns, vec![1, -1, 0]);
        assert_eq!(r.num_positions, 2);
    }

    #[test]
    fn strict_unknown_is_error() {
        let sel = ColumnSelection::parse("c,x", InclusionRule::FailOnInvalid).unwrap();
        let err = sel.resolve(&cols(&["a", "b", "c"])).unwrap_err();
        assert!(matches!(err, ZdwError::BadRequestedColumn(_)));
    }

    #[test]
    fn strict_duplicate_is_error() {
        let err = ColumnSelection::parse("a,A", InclusionRule::FailOnInvalid).unwrap_err();
        assert!(matches!(err, ZdwError::BadRequestedColumn(_)));
    }

    #[test]
    fn pad_fills_missing_position() {
        let sel = ColumnSelection::parse("c,x", InclusionRule::ProvideEmptyMissing).unwrap();
        let r = sel.resolve(&cols(&["a", "b", "c"])).unwrap();
        assert_eq!(r.output_columns, vec![-1, -1, 0]);
        assert_eq!(r.blank_columns.get(&1).map(String::as_str), Some("x"));
        assert_eq!(r.num_positions, 2);
    }

    #[test]
    fn skip_compacts_gaps() {
        let sel = ColumnSelection::parse("b,x,a", InclusionRule::SkipInvalid).unwrap();
        let r = sel.resolve(&cols(&["a", "b"])).unwrap();
        // requested positions were b=0, x=1, a=2; x skipped, a compacts to 1
        assert_eq!(r.output_columns, vec![1, 0]);
        assert_eq!(r.num_positions, 2);
    }

    #[test]
    fn skip_with_no_matches_errors() {
        let sel = ColumnSelection::parse("x,y", InclusionRule::SkipInvalid).unwrap();
        let err = sel.resolve(&cols(&["a"])).unwrap_err();
        assert!(matches!(err, ZdwError::NoColumnsToOutput));
    }

    #[test]
    fn exclude_keeps_file_order() {
        let sel = ColumnSelection::parse("b", InclusionRule::ExcludeSpecified).unwrap();
        let r = sel.resolve(&cols(&["a", "b", "c"])).unwrap();
        assert_eq!(r.output_columns, vec![0, -1, 1]);
        assert_eq!(r.num_positions, 2);
    }

    #[test]
    fn case_insensitive_matching() {
        let sel = ColumnSelection::parse("NAME", InclusionRule::FailOnInvalid).unwrap();
        let r = sel.resolve(&cols(&["name"])).unwrap();
        assert_eq!(r.output_columns, vec![0]);
    }

    #[test]
    fn virtual_enable_flags() {
        let sel = ColumnSelection::parse(
            "a,virtual_export_basename",
            InclusionRule::FailOnInvalid,
        )
        .unwrap();
        assert!(sel.enables_virtual_basename());
        assert!(!sel.enables_virtual_row());

        let sel =
            ColumnSelection::parse("virtual_export_row", InclusionRule::ExcludeSpecified)
                .unwrap();
        assert!(!sel.enables_virtual_row());
    }
}
