//! Title selection for disc ripping.
//!
//! Classifies a disc as film or episodic content from its title durations
//! and picks which titles to extract.

use crate::config::SelectionConfig;
use crate::disc::Title;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Titles shorter than this are ignored for classification (5 min).
const MEANINGFUL_SECS: u64 = 300;
/// Feature-length threshold (60 min).
const LONG_SECS: u64 = 3600;
/// Lower bound of an episode-length title (20 min).
const MEDIUM_SECS: u64 = 1200;

/// Classification of disc content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscClassification {
    Movie,
    TvSeries,
    TvSeason,
    Mixed,
    Unknown,
}

impl DiscClassification {
    pub fn is_tv(&self) -> bool {
        matches!(self, DiscClassification::TvSeries | DiscClassification::TvSeason)
    }
}

impl std::fmt::Display for DiscClassification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscClassification::Movie => write!(f, "movie"),
            DiscClassification::TvSeries => write!(f, "tv_series"),
            DiscClassification::TvSeason => write!(f, "tv_season"),
            DiscClassification::Mixed => write!(f, "mixed"),
            DiscClassification::Unknown => write!(f, "unknown"),
        }
    }
}

/// Group titles whose durations lie within `tolerance` of the shortest
/// title in the group. Groups come back ordered by duration.
pub fn group_by_duration(titles: &[&Title], tolerance: u64) -> Vec<Vec<u32>> {
    let mut sorted: Vec<&Title> = titles.to_vec();
    sorted.sort_by_key(|t| t.duration);

    let mut groups: Vec<Vec<u32>> = Vec::new();
    let mut anchor = None;
    for title in sorted {
        match anchor {
            Some(start) if title.duration - start <= tolerance => {
                if let Some(group) = groups.last_mut() {
                    group.push(title.index);
                }
            }
            _ => {
                anchor = Some(title.duration);
                groups.push(vec![title.index]);
            }
        }
    }
    groups
}

fn largest_group(titles: &[&Title], tolerance: u64) -> usize {
    group_by_duration(titles, tolerance)
        .iter()
        .map(Vec::len)
        .max()
        .unwrap_or(0)
}

/// Whether `title` looks like a "play all" concatenation of `others`.
///
/// Matches when its duration is within 5% of the sum of the shorter titles,
/// or when its segment count equals the number of shorter titles.
pub fn is_likely_play_all(title: &Title, others: &[&Title]) -> bool {
    let shorter: Vec<&&Title> = others
        .iter()
        .filter(|t| t.index != title.index && t.duration < title.duration)
        .collect();
    if shorter.len() < 2 {
        return false;
    }

    let sum: u64 = shorter.iter().map(|t| t.duration).sum();
    let tolerance = sum as f64 * 0.05;
    if (title.duration as f64 - sum as f64).abs() <= tolerance {
        return true;
    }

    title.segment_count > 1 && title.segment_count as usize == shorter.len()
}

/// Picks titles to rip according to the selection thresholds.
#[derive(Debug, Clone)]
pub struct TitleSelector {
    min_movie_duration: u64,
    min_tv_duration: u64,
    max_titles: usize,
}

impl TitleSelector {
    pub fn new(cfg: &SelectionConfig) -> Self {
        Self {
            min_movie_duration: u64::from(cfg.min_movie_duration),
            min_tv_duration: u64::from(cfg.min_tv_duration),
            max_titles: cfg.max_titles.max(1) as usize,
        }
    }

    /// Classify a disc as movie or TV content from its durations.
    pub fn classify(&self, titles: &[Title]) -> DiscClassification {
        let meaningful: Vec<&Title> = titles
            .iter()
            .filter(|t| t.duration >= MEANINGFUL_SECS)
            .collect();
        if meaningful.is_empty() {
            return DiscClassification::Unknown;
        }

        let long: Vec<&Title> = meaningful
            .iter()
            .copied()
            .filter(|t| t.duration >= LONG_SECS)
            .collect();
        let medium: Vec<&Title> = meaningful
            .iter()
            .copied()
            .filter(|t| (MEDIUM_SECS..LONG_SECS).contains(&t.duration))
            .collect();
        let short: Vec<&Title> = meaningful
            .iter()
            .copied()
            .filter(|t| t.duration < MEDIUM_SECS)
            .collect();

        if !long.is_empty() && medium.len() <= 2 {
            return DiscClassification::Movie;
        }

        if medium.len() >= 3 {
            let largest = largest_group(&medium, 300);
            if largest >= 4 {
                return DiscClassification::TvSeason;
            }
            if largest >= 2 {
                return DiscClassification::TvSeries;
            }
        }

        if short.len() >= 4 && largest_group(&short, 180) >= 4 {
            return DiscClassification::TvSeries;
        }

        if !long.is_empty() && !medium.is_empty() {
            return DiscClassification::Mixed;
        }

        DiscClassification::Unknown
    }

    /// Select the titles to rip, in index order.
    ///
    /// `min_duration` overrides the classification-dependent minimum.
    pub fn select_titles(&self, titles: &[Title], min_duration: Option<u64>) -> Vec<Title> {
        if titles.is_empty() {
            return Vec::new();
        }

        let classification = self.classify(titles);
        info!(
            classification = %classification,
            total_titles = titles.len(),
            "Disc classified"
        );

        let min = min_duration.unwrap_or(if classification.is_tv() {
            self.min_tv_duration
        } else {
            self.min_movie_duration
        });

        let episodes = if classification.is_tv() && min_duration.is_none() {
            self.episode_candidates(titles)
        } else {
            Vec::new()
        };

        let mut candidates = if episodes.is_empty() {
            let candidates: Vec<Title> = titles
                .iter()
                .filter(|t| t.duration >= min)
                .cloned()
                .collect();
            if candidates.is_empty() {
                warn!(min_duration = min, "No titles meet minimum duration");
                return candidates;
            }
            if classification.is_tv() {
                filter_duplicates(filter_play_all(candidates))
            } else {
                filter_duplicates(candidates)
            }
        } else {
            episodes
        };

        if candidates.len() > self.max_titles {
            warn!(
                total = candidates.len(),
                max = self.max_titles,
                "Too many titles, limiting selection"
            );
            if classification == DiscClassification::Movie {
                candidates.sort_by(|a, b| b.duration.cmp(&a.duration));
            }
            candidates.truncate(self.max_titles);
        }

        candidates.sort_by_key(|t| t.index);
        info!(
            count = candidates.len(),
            indices = ?candidates.iter().map(|t| t.index).collect::<Vec<_>>(),
            "Selected titles"
        );
        candidates
    }

    /// Episode-length titles of a TV disc, in index order.
    ///
    /// Empty unless the disc classifies as TV.
    pub fn episodes(&self, titles: &[Title]) -> Vec<Title> {
        if !self.classify(titles).is_tv() {
            return Vec::new();
        }
        self.episode_candidates(titles)
    }

    fn episode_candidates(&self, titles: &[Title]) -> Vec<Title> {
        let episodes: Vec<Title> = titles
            .iter()
            .filter(|t| (self.min_tv_duration..LONG_SECS).contains(&t.duration))
            .cloned()
            .collect();
        let mut episodes = filter_duplicates(filter_play_all(episodes));
        episodes.sort_by_key(|t| t.index);
        episodes
    }

    /// Longest feature-length title, preferring ones with several audio tracks.
    pub fn main_feature<'a>(&self, titles: &'a [Title]) -> Option<&'a Title> {
        let mut candidates: Vec<&Title> = titles
            .iter()
            .filter(|t| t.duration >= self.min_movie_duration)
            .collect();
        candidates.sort_by(|a, b| b.duration.cmp(&a.duration));

        candidates
            .iter()
            .copied()
            .find(|t| t.audio_tracks.len() > 1)
            .or_else(|| candidates.first().copied())
    }
}

fn filter_play_all(titles: Vec<Title>) -> Vec<Title> {
    let keep: Vec<bool> = {
        let refs: Vec<&Title> = titles.iter().collect();
        titles
            .iter()
            .map(|title| !is_likely_play_all(title, &refs))
            .collect()
    };

    titles
        .into_iter()
        .zip(keep)
        .filter_map(|(title, keep)| {
            if !keep {
                debug!(index = title.index, duration = title.duration, "Filtered play-all title");
            }
            keep.then_some(title)
        })
        .collect()
}

/// Drop titles that repeat an earlier title's (duration, size) pair.
///
/// Discs often carry the same feature several times (angles, alternate
/// menus). Two genuinely different titles with identical duration and size
/// are merged as well.
fn filter_duplicates(titles: Vec<Title>) -> Vec<Title> {
    let mut seen = HashSet::new();
    titles
        .into_iter()
        .filter(|title| {
            let fresh = seen.insert((title.duration, title.size_bytes));
            if !fresh {
                debug!(index = title.index, duration = title.duration, "Filtered duplicate title");
            }
            fresh
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disc::AudioTrack;
    use proptest::prelude::*;

    fn selector() -> TitleSelector {
        TitleSelector::new(&SelectionConfig::default())
    }

    fn titles(durations: &[u64]) -> Vec<Title> {
        durations
            .iter()
            .enumerate()
            .map(|(i, d)| {
                let mut t = Title::new(i as u32, *d);
                t.size_bytes = 1_000_000 * (i as u64 + 1);
                t
            })
            .collect()
    }

    fn indices(selected: &[Title]) -> Vec<u32> {
        selected.iter().map(|t| t.index).collect()
    }

    #[test]
    fn test_movie_with_extras_respects_minimum() {
        let disc = titles(&[7200, 600, 300]);
        let selected = selector().select_titles(&disc, Some(600));

        assert_eq!(indices(&selected), vec![0, 1]);
        assert_eq!(selected[0].duration, 7200);
        assert_eq!(selected[1].duration, 600);
    }

    #[test]
    fn test_classify_movie() {
        assert_eq!(
            selector().classify(&titles(&[7200, 600, 300])),
            DiscClassification::Movie
        );
    }

    #[test]
    fn test_classify_tv_season() {
        let disc = titles(&[2640, 2700, 2580, 2660, 120]);
        assert_eq!(selector().classify(&disc), DiscClassification::TvSeason);
    }

    #[test]
    fn test_classify_short_episodes_as_series() {
        let disc = titles(&[900, 880, 910, 890]);
        assert_eq!(selector().classify(&disc), DiscClassification::TvSeries);
    }

    #[test]
    fn test_classify_unknown() {
        assert_eq!(selector().classify(&titles(&[120, 60])), DiscClassification::Unknown);
        assert_eq!(selector().classify(&[]), DiscClassification::Unknown);
    }

    #[test]
    fn test_tv_play_all_title_is_dropped() {
        // four episodes plus a concatenation of all of them
        let disc = titles(&[2640, 2700, 2580, 2660, 10580]);
        let selected = selector().select_titles(&disc, None);
        assert_eq!(indices(&selected), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_tv_selection_keeps_episode_length_titles() {
        // four episodes plus a feature-length bonus that is not a play-all
        let disc = titles(&[2640, 2700, 2580, 2660, 5400]);
        let sel = selector();

        assert_eq!(sel.classify(&disc), DiscClassification::TvSeason);
        assert_eq!(indices(&sel.episodes(&disc)), vec![0, 1, 2, 3]);
        assert_eq!(indices(&sel.select_titles(&disc, None)), vec![0, 1, 2, 3]);
        // an explicit minimum falls back to the plain duration filter
        assert_eq!(indices(&sel.select_titles(&disc, Some(2000))), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_episodes_empty_for_movie_disc() {
        assert!(selector().episodes(&titles(&[7200, 600, 300])).is_empty());
    }

    #[test]
    fn test_play_all_by_segment_count() {
        let mut long = Title::new(9, 4000);
        long.segment_count = 2;
        let a = Title::new(1, 1500);
        let b = Title::new(2, 1300);
        assert!(is_likely_play_all(&long, &[&a, &b]));
        assert!(!is_likely_play_all(&a, &[&long, &b]));
    }

    #[test]
    fn test_duplicate_titles_are_merged() {
        let mut disc = titles(&[7200, 7200]);
        disc[1].size_bytes = disc[0].size_bytes;
        let selected = selector().select_titles(&disc, None);
        assert_eq!(indices(&selected), vec![0]);
    }

    // Known false positive: two distinct extras that happen to share both
    // duration and size collapse into one.
    #[test]
    fn test_duplicate_filter_merges_distinct_titles_with_equal_size() {
        let mut disc = titles(&[7200, 900, 900]);
        disc[1].source_file = "00010.m2ts".to_string();
        disc[2].source_file = "00011.m2ts".to_string();
        disc[2].size_bytes = disc[1].size_bytes;

        let selected = selector().select_titles(&disc, None);
        assert_eq!(indices(&selected), vec![0, 1]);
    }

    #[test]
    fn test_max_titles_keeps_longest_for_movies() {
        let cfg = SelectionConfig {
            max_titles: 2,
            ..SelectionConfig::default()
        };
        let disc = titles(&[700, 7200, 650, 900]);
        let selected = TitleSelector::new(&cfg).select_titles(&disc, None);
        assert_eq!(indices(&selected), vec![1, 3]);
    }

    #[test]
    fn test_main_feature_prefers_multiple_audio_tracks() {
        let mut disc = titles(&[7300, 7200, 600]);
        disc[1].audio_tracks = vec![AudioTrack::default(), AudioTrack::default()];
        let main = selector().main_feature(&disc).unwrap();
        assert_eq!(main.index, 1);

        let plain = titles(&[7300, 7200]);
        assert_eq!(selector().main_feature(&plain).unwrap().index, 0);
    }

    #[test]
    fn test_group_by_duration() {
        let disc = titles(&[1300, 1310, 2600, 1250]);
        let refs: Vec<&Title> = disc.iter().collect();
        let groups = group_by_duration(&refs, 100);
        assert_eq!(groups, vec![vec![3, 0, 1], vec![2]]);
    }

    // Selection is deterministic, index ordered, bounded and never returns a
    // title below the requested minimum.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_selection_is_ordered_and_bounded(
            durations in proptest::collection::vec(0u64..10_000, 0..20),
            min in proptest::option::of(0u64..5_000),
        ) {
            let disc = titles(&durations);
            let sel = selector();
            let first = sel.select_titles(&disc, min);
            let second = sel.select_titles(&disc, min);

            prop_assert_eq!(&first, &second);
            prop_assert!(first.windows(2).all(|w| w[0].index < w[1].index));
            prop_assert!(first.len() <= 50);
            if let Some(min) = min {
                prop_assert!(first.iter().all(|t| t.duration >= min));
            }
        }
    }
}
