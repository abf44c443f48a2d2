use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;

static VERSION_NUMBER_MATCH_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+(\.\d+)*([.\-+_ ]*[A-Za-z0-9]+)*").unwrap());

/// Pulls the version token out of a noisy string such as an appcast item
/// title ("Version 1.2.3"). Returns `None` when the string carries no
/// version-shaped fragment at all.
pub fn extract_version(text: &str) -> Option<&str> {
    VERSION_NUMBER_MATCH_REGEX.find(text).map(|m| m.as_str())
}

// Character classes inside a version string. A component is a continuous
// run of characters with the same class; periods always delimit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CharClass {
    Number,
    Period,
    Text,
}

fn classify(c: char) -> CharClass {
    if c == '.' {
        CharClass::Period
    } else if c.is_ascii_digit() {
        CharClass::Number
    } else {
        CharClass::Text
    }
}

// Splits "1.20rc3" into ["1", ".", "20", "rc", "3"]. ".." yields an empty
// component, which compares as text.
fn split_version(version: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    if version.is_empty() {
        return parts;
    }

    let mut start = 0;
    let mut prev = classify(version.chars().next().unwrap());
    for (i, c) in version.char_indices().skip(1) {
        let class = classify(c);
        if class != prev || prev == CharClass::Period {
            parts.push(&version[start..i]);
            start = i;
        }
        prev = class;
    }
    parts.push(&version[start..]);
    parts
}

fn class_of(part: &str) -> CharClass {
    part.chars().next().map(classify).unwrap_or(CharClass::Text)
}

fn numeric_value(part: &str) -> u128 {
    // Parts classified as Number are all-digit runs; a failure here can
    // only mean overflow, which we clamp rather than panic on.
    part.parse::<u128>().unwrap_or_else(|_| {
        tracing::warn!(part, "version component out of range, clamping");
        u128::MAX
    })
}

/// Compares two version strings the way Sparkle does: numeric components
/// compare numerically, textual components lexically, and a number always
/// outranks a textual fragment at the same position ("1.2.0" > "1.2rc1").
/// Missing trailing components behave as zero, so "1.5" equals "1.5.0"
/// while "1.5.1" > "1.5" and "1.5" > "1.5b3". Never panics on malformed
/// input.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let parts_a = split_version(a);
    let parts_b = split_version(b);

    let common = parts_a.len().min(parts_b.len());
    for i in 0..common {
        let (pa, pb) = (parts_a[i], parts_b[i]);
        let (ca, cb) = (class_of(pa), class_of(pb));

        if ca == cb {
            match ca {
                CharClass::Number => {
                    let ord = numeric_value(pa).cmp(&numeric_value(pb));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                CharClass::Text => {
                    let ord = pa.cmp(pb);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                CharClass::Period => {}
            }
        } else if ca != CharClass::Text && cb == CharClass::Text {
            return Ordering::Greater;
        } else if ca == CharClass::Text && cb != CharClass::Text {
            return Ordering::Less;
        } else {
            // number vs. period: the period side is malformed
            tracing::debug!(a, b, "malformed version component, ordering below");
            return if ca == CharClass::Number {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }
    }

    if parts_a.len() == parts_b.len() {
        return Ordering::Equal;
    }

    // Equal up to the common prefix; scan the longer side's tail. Periods
    // and zero runs are padding ("1.5" equals "1.5.0"), the first real
    // extra component decides: numeric ranks the longer string higher
    // ("1.5.1" > "1.5"), textual ranks it lower ("1.5" > "1.5b3").
    let (extras, longer_is_a) = if parts_a.len() > parts_b.len() {
        (&parts_a[common..], true)
    } else {
        (&parts_b[common..], false)
    };

    for extra in extras {
        match class_of(extra) {
            CharClass::Period => {}
            CharClass::Number => {
                if numeric_value(extra) != 0 {
                    return if longer_is_a {
                        Ordering::Greater
                    } else {
                        Ordering::Less
                    };
                }
            }
            CharClass::Text => {
                return if longer_is_a {
                    Ordering::Less
                } else {
                    Ordering::Greater
                };
            }
        }
    }
    Ordering::Equal
}
