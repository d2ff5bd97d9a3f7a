//! Per-image verdicts from per-face match results.

use std::collections::HashMap;

use crate::types::{ImageVerdict, MatchResult, Tier};

/// Combine one image's per-face outcomes into a verdict.
///
/// Takes one item per processed face: `Some` for a face that matched, `None`
/// for a face that cleared every identity. The worst tier wins; each identity
/// appears once at its closest distance; results are ordered closest first,
/// with equal distances kept in face order.
pub fn aggregate<'a, I>(faces: I) -> ImageVerdict
where
    I: IntoIterator<Item = Option<&'a MatchResult>>,
{
    let mut face_count = 0usize;
    let mut tier = Tier::Clear;
    let mut matched: Vec<MatchResult> = Vec::new();
    let mut slot_by_id: HashMap<&str, usize> = HashMap::new();

    for face in faces {
        face_count += 1;
        let Some(m) = face else {
            continue;
        };
        tier = tier.max(m.tier);

        match slot_by_id.get(m.identity_id.as_str()) {
            Some(&slot) => {
                if m.distance < matched[slot].distance {
                    matched[slot] = m.clone();
                }
            }
            None => {
                slot_by_id.insert(m.identity_id.as_str(), matched.len());
                matched.push(m.clone());
            }
        }
    }

    // Stable: equal distances keep first-seen order.
    matched.sort_by(|a, b| a.distance.total_cmp(&b.distance));

    ImageVerdict {
        tier,
        matched_identities: matched,
        face_count,
    }
}
