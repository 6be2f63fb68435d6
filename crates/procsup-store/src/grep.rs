use procsup_core::OutputEntry;
use regex::Regex;

/// How a grep pattern is applied to matching output entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrepMode {
    /// Keep whole entries whose text matches anywhere.
    #[default]
    Line,
    /// Replace each entry's text with the matched substring; an entry with
    /// multiple matches expands into one output entry per match.
    Content,
}

/// Filters `entries` by `pattern` according to `mode`.
///
/// `Line` mode keeps entries unmodified; `Content` mode yields one entry per
/// match within a line, dropping lines with no match at all.
pub fn apply(entries: &[OutputEntry], pattern: &str, mode: GrepMode) -> Result<Vec<OutputEntry>, String> {
    let re = Regex::new(pattern).map_err(|e| e.to_string())?;
    let mut out = Vec::new();
    for entry in entries {
        match mode {
            GrepMode::Line => {
                if re.is_match(&entry.text) {
                    out.push(entry.clone());
                }
            }
            GrepMode::Content => {
                for m in re.find_iter(&entry.text) {
                    out.push(OutputEntry {
                        timestamp: entry.timestamp,
                        text: m.as_str().to_string(),
                    });
                }
            }
        }
    }
    Ok(out)
}
