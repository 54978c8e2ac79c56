use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("Unknown similarity strategy: {0}")]
    UnknownStrategy(String),
}

/// A comparator over two preprocessed melodies.
///
/// Scores are only comparable within one strategy: each has its own scale,
/// and `highest_first` tells whether a larger score means more similar.
/// Every implementation is symmetric in its arguments.
pub trait SimilarityStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn shortcut(&self) -> &'static str;
    fn highest_first(&self) -> bool;
    fn compare(&self, a: &[i32], b: &[i32]) -> f64;
}

/// Tunables for strategies that take parameters.
#[derive(Debug, Clone, Copy)]
pub struct StrategyOptions {
    /// Minimum Sakoe–Chiba half-width for `dtwwin`.
    pub dtw_window: usize,
}

impl Default for StrategyOptions {
    fn default() -> Self {
        Self { dtw_window: 3 }
    }
}

type Constructor = fn(&StrategyOptions) -> Box<dyn SimilarityStrategy>;

/// Every selectable strategy, keyed by shortcut. The first entry is the default.
pub const STRATEGIES: &[(&str, Constructor)] = &[
    ("lcs", build_lcs),
    ("dtw", build_dtw),
    ("dtwwin", build_dtw_windowed),
    ("lca", build_local_alignment),
    ("emd", build_emd),
];

fn build_lcs(_: &StrategyOptions) -> Box<dyn SimilarityStrategy> {
    Box::new(Lcs)
}

fn build_dtw(_: &StrategyOptions) -> Box<dyn SimilarityStrategy> {
    Box::new(Dtw)
}

fn build_dtw_windowed(options: &StrategyOptions) -> Box<dyn SimilarityStrategy> {
    Box::new(DtwWindowed {
        window: options.dtw_window,
    })
}

fn build_local_alignment(_: &StrategyOptions) -> Box<dyn SimilarityStrategy> {
    Box::new(LocalAlignment)
}

fn build_emd(_: &StrategyOptions) -> Box<dyn SimilarityStrategy> {
    Box::new(Emd)
}

pub const DEFAULT_STRATEGY: &str = "lcs";

/// Build the strategy registered under `shortcut`.
pub fn strategy_from_shortcut(
    shortcut: &str,
    options: &StrategyOptions,
) -> Result<Box<dyn SimilarityStrategy>, StrategyError> {
    STRATEGIES
        .iter()
        .find(|(s, _)| *s == shortcut)
        .map(|(_, build)| build(options))
        .ok_or_else(|| StrategyError::UnknownStrategy(shortcut.to_string()))
}

/// Public description of a registered strategy.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyInfo {
    pub name: &'static str,
    pub shortcut: &'static str,
    pub highest_first: bool,
}

pub fn list_strategies() -> Vec<StrategyInfo> {
    let options = StrategyOptions::default();
    STRATEGIES
        .iter()
        .map(|(_, build)| {
            let s = build(&options);
            StrategyInfo {
                name: s.name(),
                shortcut: s.shortcut(),
                highest_first: s.highest_first(),
            }
        })
        .collect()
}

/// Longest common subsequence length.
pub struct Lcs;

impl SimilarityStrategy for Lcs {
    fn name(&self) -> &'static str {
        "Longest common subsequence"
    }

    fn shortcut(&self) -> &'static str {
        "lcs"
    }

    fn highest_first(&self) -> bool {
        true
    }

    fn compare(&self, a: &[i32], b: &[i32]) -> f64 {
        // Rolling rows of the (len(a)+1) x (len(b)+1) table
        let mut prev = vec![0u32; b.len() + 1];
        let mut curr = vec![0u32; b.len() + 1];
        for &x in a {
            for (j, &y) in b.iter().enumerate() {
                curr[j + 1] = if x == y {
                    prev[j] + 1
                } else {
                    prev[j + 1].max(curr[j])
                };
            }
            std::mem::swap(&mut prev, &mut curr);
        }
        f64::from(prev[b.len()])
    }
}

/// Dynamic time warping with absolute-difference step cost.
pub struct Dtw;

impl SimilarityStrategy for Dtw {
    fn name(&self) -> &'static str {
        "Dynamic time warping"
    }

    fn shortcut(&self) -> &'static str {
        "dtw"
    }

    fn highest_first(&self) -> bool {
        false
    }

    fn compare(&self, a: &[i32], b: &[i32]) -> f64 {
        dtw_banded(a, b, None)
    }
}

/// Dynamic time warping restricted to a Sakoe–Chiba band.
pub struct DtwWindowed {
    pub window: usize,
}

impl SimilarityStrategy for DtwWindowed {
    fn name(&self) -> &'static str {
        "Dynamic time warping with window constraint"
    }

    fn shortcut(&self) -> &'static str {
        "dtwwin"
    }

    fn highest_first(&self) -> bool {
        false
    }

    fn compare(&self, a: &[i32], b: &[i32]) -> f64 {
        let w = self.window.max(a.len().abs_diff(b.len()));
        dtw_banded(a, b, Some(w))
    }
}

/// Classic 3-neighbour DTW. With `band = Some(w)`, only cells with
/// `|i - j| <= w` are reachable; all others stay infinite.
fn dtw_banded(a: &[i32], b: &[i32], band: Option<usize>) -> f64 {
    let (n, m) = (a.len(), b.len());
    let mut dtw = vec![vec![f64::INFINITY; m + 1]; n + 1];
    dtw[0][0] = 0.0;

    for i in 1..=n {
        let (lo, hi) = match band {
            Some(w) => (i.saturating_sub(w).max(1), (i + w).min(m)),
            None => (1, m),
        };
        for j in lo..=hi {
            let cost = f64::from((a[i - 1] - b[j - 1]).abs());
            let best = dtw[i - 1][j].min(dtw[i][j - 1]).min(dtw[i - 1][j - 1]);
            dtw[i][j] = cost + best;
        }
    }
    dtw[n][m]
}

/// Smith–Waterman local alignment: match +1, mismatch -1, gap -2.
pub struct LocalAlignment;

const MATCH_SCORE: i64 = 1;
const MISMATCH_SCORE: i64 = -1;
const GAP_SCORE: i64 = -2;

impl SimilarityStrategy for LocalAlignment {
    fn name(&self) -> &'static str {
        "Local alignment"
    }

    fn shortcut(&self) -> &'static str {
        "lca"
    }

    fn highest_first(&self) -> bool {
        true
    }

    fn compare(&self, a: &[i32], b: &[i32]) -> f64 {
        let mut prev = vec![0i64; b.len() + 1];
        let mut curr = vec![0i64; b.len() + 1];
        let mut best = 0i64;
        for &x in a {
            curr[0] = 0;
            for (j, &y) in b.iter().enumerate() {
                let diag = prev[j] + if x == y { MATCH_SCORE } else { MISMATCH_SCORE };
                let up = prev[j + 1] + GAP_SCORE;
                let left = curr[j] + GAP_SCORE;
                curr[j + 1] = diag.max(up).max(left).max(0);
                best = best.max(curr[j + 1]);
            }
            std::mem::swap(&mut prev, &mut curr);
        }
        best as f64
    }
}

/// 1-D Wasserstein distance between the value distributions of two melodies.
pub struct Emd;

impl SimilarityStrategy for Emd {
    fn name(&self) -> &'static str {
        "Earth mover's distance"
    }

    fn shortcut(&self) -> &'static str {
        "emd"
    }

    fn highest_first(&self) -> bool {
        false
    }

    fn compare(&self, a: &[i32], b: &[i32]) -> f64 {
        wasserstein_distance(a, b)
    }
}

/// Integral of |F_a - F_b| over the merged support, where F is the
/// empirical CDF. An empty side has no distribution: infinite distance.
fn wasserstein_distance(a: &[i32], b: &[i32]) -> f64 {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => return 0.0,
        (true, false) | (false, true) => return f64::INFINITY,
        _ => {}
    }

    let mut a_sorted = a.to_vec();
    let mut b_sorted = b.to_vec();
    a_sorted.sort_unstable();
    b_sorted.sort_unstable();

    let mut support: Vec<i32> = a_sorted.iter().chain(&b_sorted).copied().collect();
    support.sort_unstable();

    let (na, nb) = (a.len() as f64, b.len() as f64);
    support
        .windows(2)
        .filter(|w| w[1] > w[0])
        .map(|w| {
            let cdf_a = a_sorted.partition_point(|&x| x <= w[0]) as f64 / na;
            let cdf_b = b_sorted.partition_point(|&x| x <= w[0]) as f64 / nb;
            (cdf_a - cdf_b).abs() * f64::from(w[1] - w[0])
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all() -> Vec<Box<dyn SimilarityStrategy>> {
        let options = StrategyOptions::default();
        STRATEGIES.iter().map(|(_, build)| build(&options)).collect()
    }

    #[test]
    fn test_registry_shortcuts_match() {
        for (shortcut, build) in STRATEGIES {
            assert_eq!(build(&StrategyOptions::default()).shortcut(), *shortcut);
        }
        assert_eq!(STRATEGIES[0].0, DEFAULT_STRATEGY);
    }

    #[test]
    fn test_unknown_shortcut() {
        let err = strategy_from_shortcut("nope", &StrategyOptions::default()).err();
        assert!(matches!(err, Some(StrategyError::UnknownStrategy(s)) if s == "nope"));
    }

    #[test]
    fn test_lcs() {
        let lcs = Lcs;
        assert_eq!(lcs.compare(&[1, 2, 3], &[1, 2, 3]), 3.0);
        assert_eq!(lcs.compare(&[1, 2, 3], &[1, 2, 3, 4]), 3.0);
        assert_eq!(lcs.compare(&[1, 3, 2, 3], &[1, 2, 3]), 3.0);
        assert_eq!(lcs.compare(&[1, 2, 2, 3], &[1, 2, 3]), 3.0);
        assert_eq!(lcs.compare(&[5, 1, 2, 3], &[1, 2, 3]), 3.0);
        assert_eq!(lcs.compare(&[1, 2, 3], &[1, 2]), 2.0);
        assert_eq!(lcs.compare(&[5, 2, 3], &[1, 2, 3]), 2.0);
        assert_eq!(lcs.compare(&[5, 2, 2, 2, 2, 2, 3], &[5, 8, 3]), 2.0);
    }

    #[test]
    fn test_lcs_short_inputs() {
        assert_eq!(Lcs.compare(&[], &[1, 2]), 0.0);
        assert_eq!(Lcs.compare(&[2], &[1, 2]), 1.0);
        assert_eq!(Lcs.compare(&[3], &[1, 2]), 0.0);
    }

    #[test]
    fn test_dtw() {
        let dtw = Dtw;
        assert_eq!(dtw.compare(&[1, 2, 3], &[1, 2, 3]), 0.0);
        assert_eq!(dtw.compare(&[1, 2, 3], &[1, 2, 3, 4]), 1.0);
        assert_eq!(dtw.compare(&[1, 3, 2, 3], &[1, 2, 3]), 1.0);
        assert_eq!(dtw.compare(&[1, 2, 2, 3], &[1, 2, 3]), 0.0);
        assert_eq!(dtw.compare(&[5, 1, 2, 3], &[1, 2, 3]), 4.0);
        assert_eq!(dtw.compare(&[1, 2, 3], &[1, 2]), 1.0);
        assert_eq!(dtw.compare(&[5, 2, 3], &[1, 2, 3]), 4.0);
        assert_eq!(dtw.compare(&[5, 2, 2, 2, 2, 2, 3], &[5, 8, 3]), 8.0);
    }

    #[test]
    fn test_dtw_empty() {
        assert_eq!(Dtw.compare(&[], &[]), 0.0);
        assert!(Dtw.compare(&[], &[1]).is_infinite());
    }

    #[test]
    fn test_dtw_window_matches_full_when_wide() {
        let a = [0, 2, -1, 3, 0, 0, 1];
        let b = [0, 1, 1, -2, 4];
        let wide = DtwWindowed { window: 10 };
        assert_eq!(wide.compare(&a, &b), Dtw.compare(&a, &b));
    }

    #[test]
    fn test_dtw_window_constrains_path() {
        // With a zero-width band on equal lengths, only the diagonal is allowed
        let narrow = DtwWindowed { window: 0 };
        assert_eq!(narrow.compare(&[1, 1, 5], &[1, 5, 5]), 4.0);
        assert_eq!(Dtw.compare(&[1, 1, 5], &[1, 5, 5]), 0.0);
        // Length difference widens the band so the end cell stays reachable
        assert!(narrow.compare(&[1, 2, 3, 4], &[1, 4]).is_finite());
    }

    #[test]
    fn test_las() {
        let las = LocalAlignment;
        assert_eq!(las.compare(&[1, 2, 3], &[1, 2, 3]), 3.0);
        assert_eq!(las.compare(&[1, 2, 3], &[1, 2, 3, 4]), 3.0);
        assert_eq!(las.compare(&[1, 3, 2, 3], &[1, 2, 3]), 2.0);
        assert_eq!(las.compare(&[1, 2, 2, 3], &[1, 2, 3]), 2.0);
        assert_eq!(las.compare(&[5, 1, 2, 3], &[1, 2, 3]), 3.0);
        assert_eq!(las.compare(&[1, 2, 3], &[1, 2]), 2.0);
        assert_eq!(las.compare(&[5, 2, 3], &[1, 2, 3]), 2.0);
        assert_eq!(las.compare(&[5, 2, 2, 2, 2, 2, 3], &[5, 8, 3]), 1.0);
    }

    #[test]
    fn test_emd() {
        assert_eq!(Emd.compare(&[0, 1, 3], &[5, 6, 8]), 5.0);
        assert!((Emd.compare(&[0, 10], &[0]) - 5.0).abs() < 1e-12);
        assert_eq!(Emd.compare(&[3, 1, 2], &[1, 2, 3]), 0.0);
        assert!(Emd.compare(&[], &[1]).is_infinite());
    }

    #[test]
    fn test_identity_properties() {
        let x = [0, 2, 2, -1, 5, -3, 0, 7];
        assert_eq!(Lcs.compare(&x, &x), x.len() as f64);
        assert_eq!(Dtw.compare(&x, &x), 0.0);
        assert_eq!(DtwWindowed { window: 3 }.compare(&x, &x), 0.0);
        assert_eq!(Emd.compare(&x, &x), 0.0);
        assert_eq!(LocalAlignment.compare(&x, &x), x.len() as f64);
    }

    #[test]
    fn test_symmetry() {
        let cases: [(&[i32], &[i32]); 5] = [
            (&[1, 2, 3], &[1, 2, 3, 4]),
            (&[5, 2, 2, 2, 2, 2, 3], &[5, 8, 3]),
            (&[0, -2, 4, 1], &[3]),
            (&[], &[1, 2]),
            (&[0, 1, 0, 1, 0, 1, 0, 1, 0], &[1, 1, 0, 0, 1]),
        ];
        for s in all() {
            for (a, b) in cases {
                let ab = s.compare(a, b);
                let ba = s.compare(b, a);
                assert!(ab == ba, "{} not symmetric on {:?} / {:?}: {} vs {}", s.shortcut(), a, b, ab, ba);
            }
        }
    }
}
