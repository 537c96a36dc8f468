//! Call id correlation across the provider's two id formats
//!
//! Call-ended notifications identify a call by its short id. Recording
//! notifications may carry only the id with a recording suffix appended
//! (`<short id>.<n>`, `<short id>_<n>`, `<short id>-rec`). Every lookup that
//! crosses the two goes through this module.

/// Separators the provider puts between a short id and its recording suffix
const SUFFIX_SEPARATORS: [char; 3] = ['.', '_', '-'];

/// Short id recovered from an id with a recording suffix, if it has one
///
/// ```
/// use callflow_ingest::provider::correlation::strip_recording_suffix;
///
/// assert_eq!(strip_recording_suffix("1700000000.42"), Some("1700000000"));
/// assert_eq!(strip_recording_suffix("in_8f2c_rec"), Some("in_8f2c"));
/// assert_eq!(strip_recording_suffix("1700000000"), None);
/// ```
pub fn strip_recording_suffix(id: &str) -> Option<&str> {
    let (head, suffix) = id.rsplit_once(&SUFFIX_SEPARATORS[..])?;
    if head.is_empty() || suffix.is_empty() {
        return None;
    }

    let is_suffix = suffix.chars().all(|c| c.is_ascii_digit())
        || suffix.eq_ignore_ascii_case("rec")
        || suffix
            .get(..3)
            .is_some_and(|p| p.eq_ignore_ascii_case("rec") && suffix[3..].chars().all(|c| c.is_ascii_digit()));

    is_suffix.then_some(head)
}

fn push_unique(ids: &mut Vec<String>, id: &str) {
    let id = id.trim();
    if !id.is_empty() && !ids.iter().any(|existing| existing == id) {
        ids.push(id.to_string());
    }
}

/// Ids under which the call record may be stored, most specific first
///
/// Short id, then the suffixed id as delivered, then the suffixed id with
/// its suffix removed.
pub fn correlation_candidates(short_id: Option<&str>, recording_id: Option<&str>) -> Vec<String> {
    let mut ids = Vec::new();
    if let Some(short) = short_id {
        push_unique(&mut ids, short);
    }
    if let Some(rec) = recording_id {
        push_unique(&mut ids, rec);
        if let Some(stripped) = strip_recording_suffix(rec) {
            push_unique(&mut ids, stripped);
        }
    }
    ids
}

/// Ids to ask the provider for, in order
///
/// The recording API resolves suffixed ids directly, so those go first.
pub fn provider_request_ids(short_id: Option<&str>, recording_id: Option<&str>) -> Vec<String> {
    let mut ids = Vec::new();
    if let Some(rec) = recording_id {
        push_unique(&mut ids, rec);
    }
    if let Some(short) = short_id {
        push_unique(&mut ids, short);
    }
    ids
}
