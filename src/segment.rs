//! Rule-based mapping from (r_score, f_score) pairs to named customer segments

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Named customer-behaviour category derived from the r/f score pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    Hibernating,
    AtRisk,
    CantLose,
    AboutToSleep,
    NeedAttention,
    LoyalCustomers,
    Promising,
    NewCustomers,
    PotentialLoyalists,
    Champions,
    /// No rule covers the pair
    Uncategorized,
}

impl Segment {
    pub const ALL: [Segment; 11] = [
        Segment::Hibernating,
        Segment::AtRisk,
        Segment::CantLose,
        Segment::AboutToSleep,
        Segment::NeedAttention,
        Segment::LoyalCustomers,
        Segment::Promising,
        Segment::NewCustomers,
        Segment::PotentialLoyalists,
        Segment::Champions,
        Segment::Uncategorized,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Segment::Hibernating => "Hibernating",
            Segment::AtRisk => "At Risk",
            Segment::CantLose => "Can't Lose",
            Segment::AboutToSleep => "About To Sleep",
            Segment::NeedAttention => "Need Attention",
            Segment::LoyalCustomers => "Loyal Customers",
            Segment::Promising => "Promising",
            Segment::NewCustomers => "New Customers",
            Segment::PotentialLoyalists => "Potential Loyalists",
            Segment::Champions => "Champions",
            Segment::Uncategorized => "Uncategorized",
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Segment {
    type Err = String;

    /// Accepts the display label in any case, with or without spaces
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted: String = s
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        Segment::ALL
            .iter()
            .copied()
            .find(|seg| {
                seg.label()
                    .chars()
                    .filter(|c| c.is_alphanumeric())
                    .collect::<String>()
                    .to_lowercase()
                    == wanted
            })
            .ok_or_else(|| format!("unknown segment '{s}'"))
    }
}

/// Inclusive score range on one axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreRange {
    pub lo: u8,
    pub hi: u8,
}

impl ScoreRange {
    pub const fn new(lo: u8, hi: u8) -> Self {
        Self { lo, hi }
    }

    pub const fn exact(score: u8) -> Self {
        Self { lo: score, hi: score }
    }

    fn contains(&self, score: u8) -> bool {
        (self.lo..=self.hi).contains(&score)
    }

    fn is_exact(&self) -> bool {
        self.lo == self.hi
    }
}

/// One row of the segment pattern table
#[derive(Debug, Clone, Copy)]
pub struct SegmentRule {
    pub r: ScoreRange,
    pub f: ScoreRange,
    pub segment: Segment,
}

impl SegmentRule {
    const fn new(r: ScoreRange, f: ScoreRange, segment: Segment) -> Self {
        Self { r, f, segment }
    }

    pub fn matches(&self, r_score: u8, f_score: u8) -> bool {
        self.r.contains(r_score) && self.f.contains(f_score)
    }

    fn is_exact(&self) -> bool {
        self.r.is_exact() && self.f.is_exact()
    }
}

/// The standard RFM pattern table, in priority order
pub const STANDARD_RULES: [SegmentRule; 10] = [
    SegmentRule::new(ScoreRange::new(1, 2), ScoreRange::new(1, 2), Segment::Hibernating),
    SegmentRule::new(ScoreRange::new(1, 2), ScoreRange::new(3, 4), Segment::AtRisk),
    SegmentRule::new(ScoreRange::new(1, 2), ScoreRange::exact(5), Segment::CantLose),
    SegmentRule::new(ScoreRange::exact(3), ScoreRange::new(1, 2), Segment::AboutToSleep),
    SegmentRule::new(ScoreRange::exact(3), ScoreRange::exact(3), Segment::NeedAttention),
    SegmentRule::new(ScoreRange::new(3, 4), ScoreRange::new(4, 5), Segment::LoyalCustomers),
    SegmentRule::new(ScoreRange::exact(4), ScoreRange::exact(1), Segment::Promising),
    SegmentRule::new(ScoreRange::exact(5), ScoreRange::exact(1), Segment::NewCustomers),
    SegmentRule::new(ScoreRange::new(4, 5), ScoreRange::new(2, 3), Segment::PotentialLoyalists),
    SegmentRule::new(ScoreRange::exact(5), ScoreRange::new(4, 5), Segment::Champions),
];

/// Precomputed 5x5 lookup indexed by `[r_score - 1][f_score - 1]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentTable {
    cells: [[Segment; 5]; 5],
}

impl SegmentTable {
    /// Resolve every (r, f) pair once. Exact patterns are tried before range
    /// patterns; within each group the first rule in list order wins.
    pub fn build(rules: &[SegmentRule]) -> Self {
        let ordered: Vec<&SegmentRule> = rules
            .iter()
            .filter(|rule| rule.is_exact())
            .chain(rules.iter().filter(|rule| !rule.is_exact()))
            .collect();

        let mut cells = [[Segment::Uncategorized; 5]; 5];
        for (r_idx, row) in cells.iter_mut().enumerate() {
            for (f_idx, cell) in row.iter_mut().enumerate() {
                let (r, f) = (r_idx as u8 + 1, f_idx as u8 + 1);
                if let Some(rule) = ordered.iter().find(|rule| rule.matches(r, f)) {
                    *cell = rule.segment;
                }
            }
        }
        Self { cells }
    }

    /// Table built from [`STANDARD_RULES`]
    pub fn standard() -> &'static SegmentTable {
        static TABLE: OnceLock<SegmentTable> = OnceLock::new();
        TABLE.get_or_init(|| SegmentTable::build(&STANDARD_RULES))
    }

    pub fn classify(&self, r_score: u8, f_score: u8) -> Segment {
        if !(1..=5).contains(&r_score) || !(1..=5).contains(&f_score) {
            return Segment::Uncategorized;
        }
        self.cells[(r_score - 1) as usize][(f_score - 1) as usize]
    }
}

/// Classify a score pair with the standard table
pub fn classify(r_score: u8, f_score: u8) -> Segment {
    SegmentTable::standard().classify(r_score, f_score)
}

/// Two-character key: r digit followed by f digit
pub fn rf_key(r_score: u8, f_score: u8) -> String {
    format!("{r_score}{f_score}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_rules_partition_grid() {
        for r in 1..=5 {
            for f in 1..=5 {
                let hits = STANDARD_RULES.iter().filter(|rule| rule.matches(r, f)).count();
                assert_eq!(hits, 1, "pair {r}{f} matched {hits} rules");
                assert_ne!(classify(r, f), Segment::Uncategorized);
            }
        }
    }

    #[test]
    fn test_new_customers_pair() {
        assert_eq!(classify(5, 1), Segment::NewCustomers);
        assert_eq!(classify(4, 1), Segment::Promising);
    }

    #[test]
    fn test_table_samples() {
        assert_eq!(classify(1, 1), Segment::Hibernating);
        assert_eq!(classify(2, 4), Segment::AtRisk);
        assert_eq!(classify(1, 5), Segment::CantLose);
        assert_eq!(classify(3, 2), Segment::AboutToSleep);
        assert_eq!(classify(3, 3), Segment::NeedAttention);
        assert_eq!(classify(4, 4), Segment::LoyalCustomers);
        assert_eq!(classify(3, 5), Segment::LoyalCustomers);
        assert_eq!(classify(4, 3), Segment::PotentialLoyalists);
        assert_eq!(classify(5, 2), Segment::PotentialLoyalists);
        assert_eq!(classify(5, 5), Segment::Champions);
    }

    #[test]
    fn test_out_of_range_scores() {
        assert_eq!(classify(0, 3), Segment::Uncategorized);
        assert_eq!(classify(3, 6), Segment::Uncategorized);
    }

    #[test]
    fn test_uncovered_pairs_fall_back() {
        let rules = [SegmentRule::new(ScoreRange::new(1, 5), ScoreRange::exact(1), Segment::Hibernating)];
        let table = SegmentTable::build(&rules);
        assert_eq!(table.classify(2, 1), Segment::Hibernating);
        assert_eq!(table.classify(2, 2), Segment::Uncategorized);
    }

    #[test]
    fn test_exact_rule_beats_earlier_range() {
        let rules = [
            SegmentRule::new(ScoreRange::new(4, 5), ScoreRange::new(1, 5), Segment::Champions),
            SegmentRule::new(ScoreRange::exact(5), ScoreRange::exact(1), Segment::NewCustomers),
        ];
        let table = SegmentTable::build(&rules);
        assert_eq!(table.classify(5, 1), Segment::NewCustomers);
        assert_eq!(table.classify(4, 1), Segment::Champions);
    }

    #[test]
    fn test_segment_from_str() {
        assert_eq!("champions".parse::<Segment>(), Ok(Segment::Champions));
        assert_eq!("Can't Lose".parse::<Segment>(), Ok(Segment::CantLose));
        assert_eq!("at-risk".parse::<Segment>(), Ok(Segment::AtRisk));
        assert!("VIP".parse::<Segment>().is_err());
    }

    #[test]
    fn test_rf_key() {
        assert_eq!(rf_key(5, 1), "51");
    }
}
