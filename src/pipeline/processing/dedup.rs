use crate::types::MediaCandidate;
use std::collections::{HashMap, HashSet};

/// Collapse renditions of the same asset to one winner per canonical id.
///
/// Candidates without an id stay singletons, except that a URL seen verbatim
/// more than once is kept only at its first occurrence. Group order follows
/// first appearance.
pub fn reduce(candidates: Vec<MediaCandidate>) -> Vec<MediaCandidate> {
    reduce_by(candidates, |candidate| candidate)
}

/// [`reduce`] over any item that carries a candidate, e.g. work items with
/// their provenance.
pub fn reduce_by<T, F>(items: Vec<T>, candidate_of: F) -> Vec<T>
where
    F: Fn(&T) -> &MediaCandidate,
{
    enum Slot {
        Group(usize),
        Single(usize),
    }

    let mut slots: Vec<Slot> = Vec::new();
    let mut winners: Vec<Option<T>> = Vec::new();
    let mut by_id: HashMap<String, usize> = HashMap::new();
    let mut seen_urls: HashSet<String> = HashSet::new();

    for item in items {
        let candidate = candidate_of(&item);
        match candidate.canonical_id.clone() {
            Some(id) => match by_id.get(&id) {
                Some(&index) => {
                    let replace = match winners[index].as_ref() {
                        Some(current) => beats(candidate, candidate_of(current)),
                        None => true,
                    };
                    if replace {
                        winners[index] = Some(item);
                    }
                }
                None => {
                    by_id.insert(id, winners.len());
                    slots.push(Slot::Group(winners.len()));
                    winners.push(Some(item));
                }
            },
            None => {
                if !seen_urls.insert(candidate.source_url.clone()) {
                    continue;
                }
                slots.push(Slot::Single(winners.len()));
                winners.push(Some(item));
            }
        }
    }

    slots
        .into_iter()
        .filter_map(|slot| match slot {
            Slot::Group(index) | Slot::Single(index) => winners[index].take(),
        })
        .collect()
}

/// Whether a later group member should replace the current winner. Ties keep
/// the first seen.
fn beats(challenger: &MediaCandidate, current: &MediaCandidate) -> bool {
    match (
        challenger.kind.is_self_contained(),
        current.kind.is_self_contained(),
    ) {
        (true, false) => true,
        (false, true) => false,
        _ => challenger.quality() > current.quality(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::processing::classifier::classify;
    use crate::types::MediaKind;

    fn rendition(id: &str, rank: u32) -> MediaCandidate {
        MediaCandidate::new(
            format!("https://v.redd.it/{}/DASH_{}.mp4", id, rank),
            MediaKind::RedditVideoFallback,
        )
        .with_canonical_id(id)
        .with_quality_rank(rank)
    }

    #[test]
    fn keeps_best_rendition_and_group_order() {
        let redgifs = MediaCandidate::new("https://redgifs.com/watch/b", MediaKind::RedGifs);
        let reduced = reduce(vec![
            rendition("abc", 240),
            rendition("abc", 720),
            redgifs.clone(),
        ]);
        assert_eq!(reduced, vec![rendition("abc", 720), redgifs]);
    }

    #[test]
    fn self_contained_format_wins_outright() {
        let bound = MediaCandidate::new("https://redgifs.com/watch/cat", MediaKind::RedGifs)
            .with_canonical_id("abc");
        let reduced = reduce(vec![rendition("abc", 1080), bound.clone(), rendition("abc", 2160)]);
        assert_eq!(reduced, vec![bound]);
    }

    #[test]
    fn quality_ties_keep_first_seen() {
        let first = rendition("abc", 480);
        let mut second = rendition("abc", 480);
        second.source_url.push_str("?copy=2");
        assert_eq!(reduce(vec![first.clone(), second]), vec![first]);
    }

    #[test]
    fn singletons_are_never_merged_but_verbatim_repeats_are() {
        let a = MediaCandidate::new("https://i.redd.it/a.jpg", MediaKind::DirectImage);
        let b = MediaCandidate::new("https://i.redd.it/b.jpg", MediaKind::DirectImage);
        let reduced = reduce(vec![a.clone(), b.clone(), a.clone()]);
        assert_eq!(reduced, vec![a, b]);
    }

    #[test]
    fn reduce_is_idempotent() {
        let input: Vec<_> = [
            "https://v.redd.it/abc/DASH_240.mp4",
            "https://i.redd.it/x.png",
            "https://v.redd.it/abc/DASH_720.mp4",
            "https://preview.redd.it/p1.jpg?width=320",
            "https://preview.redd.it/p1.jpg?width=960",
            "https://i.redd.it/x.png",
            "https://redgifs.com/watch/zzz",
        ]
        .iter()
        .map(|u| classify(u))
        .collect();
        let once = reduce(input);
        let twice = reduce(once.clone());
        assert_eq!(once, twice);
        assert_eq!(once.len(), 4);
        assert_eq!(once[0].quality_rank, Some(720));
        assert_eq!(once[2].quality_rank, Some(960));
    }

    #[test]
    fn winner_rank_dominates_its_group() {
        let group = vec![rendition("g", 360), rendition("g", 1080), rendition("g", 720)];
        let winner = reduce(group.clone()).pop().unwrap();
        assert!(group.iter().all(|c| winner.quality() >= c.quality()));
    }
}
