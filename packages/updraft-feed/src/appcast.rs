use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::fetcher::FeedError;

/// One release advertised by the appcast. Lives for a single check cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseCandidate {
    /// User-facing version (sparkle:shortVersionString, falling back to
    /// sparkle:version when no short form is given).
    pub version: String,
    /// Internal build identifier (sparkle:version). Used for comparison
    /// instead of `version` when the running app also carries one.
    pub build_version: Option<String>,
    pub download_url: String,
    pub release_notes_url: Option<String>,
    pub is_critical: bool,
    /// Hex sha256 of the enclosure, verified before the installer runs.
    pub sha256: Option<String>,
    pub title: Option<String>,
}

impl ReleaseCandidate {
    /// The string to compare against the running app when it exposes a
    /// build version of its own.
    pub fn comparable_build(&self) -> Option<&str> {
        self.build_version.as_deref()
    }
}

// Accumulates fields of one <item> until we know whether it is complete
// enough to become a candidate.
#[derive(Default)]
struct PartialItem {
    short_version: Option<String>,
    build_version: Option<String>,
    download_url: Option<String>,
    release_notes_url: Option<String>,
    is_critical: bool,
    sha256: Option<String>,
    title: Option<String>,
}

impl PartialItem {
    fn into_candidate(self) -> Option<ReleaseCandidate> {
        let download_url = self.download_url?;
        let version = self.short_version.or_else(|| self.build_version.clone())?;
        Some(ReleaseCandidate {
            version,
            build_version: self.build_version,
            download_url,
            release_notes_url: self.release_notes_url.filter(|s| !s.trim().is_empty()),
            is_critical: self.is_critical,
            sha256: self.sha256,
            title: self.title.filter(|s| !s.trim().is_empty()),
        })
    }

    fn read_enclosure(&mut self, e: &BytesStart) {
        for attr in e.attributes().filter_map(|a| a.ok()) {
            let value = String::from_utf8_lossy(attr.value.as_ref()).to_string();
            match attr.key.as_ref() {
                b"url" => self.download_url = Some(value),
                b"sparkle:version" => self.build_version = Some(value),
                b"sparkle:shortVersionString" => self.short_version = Some(value),
                b"sparkle:sha256Sum" => self.sha256 = Some(value),
                _ => (),
            }
        }
    }
}

/// Parses a Sparkle-style appcast document into release candidates, newest
/// first as listed in the feed. Items missing an enclosure URL or any
/// version information are skipped with a warning; only a document that
/// fails to parse at all is an error. An empty channel is a valid result.
pub fn parse_appcast(xml: &str) -> Result<Vec<ReleaseCandidate>, FeedError> {
    let mut reader = Reader::from_str(xml.trim());
    let mut candidates = Vec::new();
    let mut in_channel = 0usize;

    loop {
        match reader.read_event() {
            Err(e) => return Err(FeedError::Parse(e.to_string())),
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"channel" => in_channel += 1,
                b"item" if in_channel > 0 => match parse_item(&mut reader)? {
                    Some(candidate) => candidates.push(candidate),
                    None => tracing::warn!("skipping malformed appcast item"),
                },
                _ => (),
            },
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"channel" {
                    in_channel = in_channel.saturating_sub(1);
                }
            }
            _ => (),
        }
    }

    Ok(candidates)
}

fn parse_item(reader: &mut Reader<&[u8]>) -> Result<Option<ReleaseCandidate>, FeedError> {
    let mut item = PartialItem::default();
    let mut current_tag = Vec::new();

    loop {
        match reader.read_event() {
            Err(e) => return Err(FeedError::Parse(e.to_string())),
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => {
                match e.name().as_ref() {
                    b"enclosure" => item.read_enclosure(&e),
                    b"sparkle:criticalUpdate" => item.is_critical = true,
                    name => current_tag = name.to_vec(),
                };
            }
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"enclosure" => item.read_enclosure(&e),
                b"sparkle:criticalUpdate" => item.is_critical = true,
                _ => (),
            },
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"item" {
                    break;
                }
                current_tag.clear();
            }
            Ok(Event::Text(e)) => {
                if let Ok(text) = e.unescape() {
                    match current_tag.as_slice() {
                        b"title" => {
                            item.title
                                .get_or_insert_with(String::new)
                                .push_str(&text);
                        }
                        b"sparkle:releaseNotesLink" => {
                            item.release_notes_url
                                .get_or_insert_with(String::new)
                                .push_str(text.trim());
                        }
                        _ => (),
                    }
                }
            }
            _ => (),
        }
    }

    Ok(item.into_candidate())
}
