use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use thiserror::Error;

/// Named level standing for "any integer" in numeric options.
pub const NUMERIC_BASE: &str = "k";
/// Named level standing for "the integer after `k`". Declaring it above or below
/// [`NUMERIC_BASE`] fixes the direction in which plain integers gain precision.
pub const NUMERIC_SUCCESSOR: &str = "k+1";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderError {
    #[error("Level {level} is not registered for option '{option}'")]
    UnknownLevel { option: String, level: Level },
    /// `less` is already (transitively) at least as precise as `more`.
    #[error("Declaring {more} >= {less} for option '{option}' contradicts the existing order")]
    Cycle {
        option: String,
        more: Level,
        less: Level,
    },
}

/// A value an option can take. Integers and names are both accepted in
/// configuration files, so the representation is untagged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Level {
    Number(i64),
    Name(String),
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Number(n) => write!(f, "{n}"),
            Level::Name(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Level {
    fn from(n: i64) -> Self {
        Level::Number(n)
    }
}

impl From<i32> for Level {
    fn from(n: i32) -> Self {
        Level::Number(n as i64)
    }
}

impl From<&str> for Level {
    fn from(s: &str) -> Self {
        Level::Name(s.to_string())
    }
}

impl From<String> for Level {
    fn from(s: String) -> Self {
        Level::Name(s)
    }
}

impl From<&Level> for Level {
    fn from(l: &Level) -> Self {
        l.clone()
    }
}

/// Category labels attached to an option, used to group options in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tag {
    Object,
    Exception,
    Static,
    Reflection,
    TaintAnalysisSpecific,
    AndroidLifecycle,
    Library,
}

/// How the first operand of [`PrecisionOrder::relation`] relates to the second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Relation {
    LessPrecise,
    Equal,
    MorePrecise,
    /// Both values are known but no declared chain connects them.
    Unrelated,
}

impl From<Ordering> for Relation {
    fn from(ord: Ordering) -> Self {
        match ord {
            Ordering::Less => Relation::LessPrecise,
            Ordering::Equal => Relation::Equal,
            Ordering::Greater => Relation::MorePrecise,
        }
    }
}

/// One equivalence class in the ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Rank {
    Single(Level),
    Tied(BTreeSet<Level>),
}

impl Rank {
    fn from_class(class: &BTreeSet<Level>) -> Self {
        match class.iter().next() {
            Some(only) if class.len() == 1 => Rank::Single(only.clone()),
            _ => Rank::Tied(class.clone()),
        }
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rank::Single(l) => write!(f, "{l}"),
            Rank::Tied(set) => {
                let parts: Vec<String> = set.iter().map(|l| l.to_string()).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
        }
    }
}

/// Where a level sits once the declared order has been applied.
#[derive(Debug, Clone, Copy)]
enum Placement {
    Ranked(usize),
    /// An integer standing in for the numeric family, which sits at the rank of `k`.
    Family(usize, i64),
    /// An integer with no ranked family to fall back on.
    Number(i64),
    Unranked,
}

/// The per-option precision order.
///
/// Levels only acquire a rank once a declaration mentions them. A ranked level's
/// rank is the length of the longest declared chain beneath it, so two levels
/// that were each declared above the same level (and nothing else) end up tied
/// in one equivalence class instead of forming two ranks.
///
/// Strict precision needs a declared path. Levels on separate chains are
/// [`Relation::Unrelated`] even when their ranks differ.
#[derive(Debug, Clone, Default)]
pub struct PrecisionOrder {
    name: String,
    tags: BTreeSet<Tag>,
    levels: BTreeSet<Level>,
    /// Declared edges, keyed by the more precise side.
    below: BTreeMap<Level, BTreeSet<Level>>,
    ranks: Vec<BTreeSet<Level>>,
    rank_of: HashMap<Level, usize>,
    /// Every level reachable below each ranked level.
    closure: HashMap<Level, BTreeSet<Level>>,
}

impl PrecisionOrder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &BTreeSet<Tag> {
        &self.tags
    }

    pub fn add_tag(&mut self, tag: Tag) {
        self.tags.insert(tag);
    }

    pub fn add_level(&mut self, level: impl Into<Level>) {
        self.levels.insert(level.into());
    }

    pub fn levels(&self) -> &BTreeSet<Level> {
        &self.levels
    }

    /// All ranked equivalence classes, least precise first.
    pub fn ranks(&self) -> Vec<Rank> {
        self.ranks.iter().map(Rank::from_class).collect()
    }

    /// Records that `more` is at least as precise as `less`.
    ///
    /// Fails without modifying the order if either level is unregistered or if
    /// `less` already dominates `more`.
    pub fn declare_at_least_as_precise(
        &mut self,
        more: impl Into<Level>,
        less: impl Into<Level>,
    ) -> Result<(), OrderError> {
        let (more, less) = (more.into(), less.into());
        for level in [&more, &less] {
            if !self.levels.contains(level) {
                return Err(self.unknown(level));
            }
        }
        if more == less {
            return Ok(());
        }
        if self.dominates(&less, &more) {
            return Err(OrderError::Cycle {
                option: self.name.clone(),
                more,
                less,
            });
        }
        self.below.entry(more).or_default().insert(less);
        self.rerank();
        Ok(())
    }

    pub fn relation(
        &self,
        a: impl Into<Level>,
        b: impl Into<Level>,
    ) -> Result<Relation, OrderError> {
        let (a, b) = (a.into(), b.into());
        let (pa, pb) = (self.place(&a)?, self.place(&b)?);
        if a == b {
            return Ok(Relation::Equal);
        }
        let (x, y) = match (pa, pb) {
            (Placement::Family(_, m), Placement::Family(_, n))
            | (Placement::Number(m), Placement::Number(n)) => {
                return Ok(self.numeric_cmp(m, n).into());
            }
            (Placement::Ranked(x), Placement::Ranked(y))
            | (Placement::Ranked(x), Placement::Family(y, _))
            | (Placement::Family(x, _), Placement::Ranked(y)) => (x, y),
            _ => return Ok(Relation::Unrelated),
        };
        // Family members stand at `k` in the declared graph.
        let (a, b) = (Self::standing(a, pa), Self::standing(b, pb));
        Ok(if a == b {
            Relation::Equal
        } else if self.dominates(&a, &b) {
            Relation::MorePrecise
        } else if self.dominates(&b, &a) {
            Relation::LessPrecise
        } else if x == y {
            Relation::Equal
        } else {
            Relation::Unrelated
        })
    }

    /// `-1`, `0` or `+1` as `a` is less, equally or more precise than `b`.
    /// Unrelated levels compare as `0`; use [`relation`](Self::relation) to tell them apart.
    pub fn compare(&self, a: impl Into<Level>, b: impl Into<Level>) -> Result<i8, OrderError> {
        Ok(match self.relation(a, b)? {
            Relation::LessPrecise => -1,
            Relation::MorePrecise => 1,
            Relation::Equal | Relation::Unrelated => 0,
        })
    }

    /// The equivalence classes strictly above `level`, nearest first.
    pub fn more_precise_than(&self, level: impl Into<Level>) -> Result<Vec<Rank>, OrderError> {
        let start = match self.place(&level.into())? {
            Placement::Ranked(r) | Placement::Family(r, _) => r,
            Placement::Number(_) | Placement::Unranked => return Ok(Vec::new()),
        };
        Ok(self.ranks[start + 1..].iter().map(Rank::from_class).collect())
    }

    fn unknown(&self, level: &Level) -> OrderError {
        OrderError::UnknownLevel {
            option: self.name.clone(),
            level: level.clone(),
        }
    }

    fn place(&self, level: &Level) -> Result<Placement, OrderError> {
        if let Some(&rank) = self.rank_of.get(level) {
            return Ok(Placement::Ranked(rank));
        }
        match level {
            Level::Number(n) => Ok(
                match self.rank_of.get(&Level::Name(NUMERIC_BASE.to_string())) {
                    Some(&rank) => Placement::Family(rank, *n),
                    None => Placement::Number(*n),
                },
            ),
            Level::Name(_) if self.levels.contains(level) => Ok(Placement::Unranked),
            Level::Name(_) => Err(self.unknown(level)),
        }
    }

    fn standing(level: Level, placement: Placement) -> Level {
        match placement {
            Placement::Family(..) => Level::Name(NUMERIC_BASE.to_string()),
            _ => level,
        }
    }

    fn numeric_cmp(&self, m: i64, n: i64) -> Ordering {
        let base = self.rank_of.get(&Level::Name(NUMERIC_BASE.to_string()));
        let succ = self.rank_of.get(&Level::Name(NUMERIC_SUCCESSOR.to_string()));
        match (base, succ) {
            (Some(b), Some(s)) if s < b => n.cmp(&m),
            _ => m.cmp(&n),
        }
    }

    /// Whether `from` reaches `to` through declared edges.
    fn dominates(&self, from: &Level, to: &Level) -> bool {
        from == to || self.closure.get(from).is_some_and(|below| below.contains(to))
    }

    fn reachable_below(&self, from: &Level) -> BTreeSet<Level> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&Level> = self.below.get(from).into_iter().flatten().collect();
        while let Some(current) = stack.pop() {
            if seen.insert(current.clone()) {
                stack.extend(self.below.get(current).into_iter().flatten());
            }
        }
        seen
    }

    fn rerank(&mut self) {
        let mut depth: HashMap<Level, usize> = HashMap::new();
        let involved: BTreeSet<&Level> = self
            .below
            .iter()
            .flat_map(|(more, lesser)| std::iter::once(more).chain(lesser.iter()))
            .collect();
        for level in &involved {
            self.chain_depth(level, &mut depth);
        }
        let top = depth.values().copied().max().unwrap_or(0);
        let mut ranks = vec![BTreeSet::new(); if depth.is_empty() { 0 } else { top + 1 }];
        for (level, &d) in &depth {
            ranks[d].insert(level.clone());
        }
        self.closure = self
            .below
            .keys()
            .map(|more| (more.clone(), self.reachable_below(more)))
            .collect();
        self.ranks = ranks;
        self.rank_of = depth;
    }

    fn chain_depth(&self, level: &Level, memo: &mut HashMap<Level, usize>) -> usize {
        if let Some(&d) = memo.get(level) {
            return d;
        }
        let d = self
            .below
            .get(level)
            .map(|lesser| {
                lesser
                    .iter()
                    .map(|l| self.chain_depth(l, memo) + 1)
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0);
        memo.insert(level.clone(), d);
        d
    }
}

/// Precision orders keyed by option name.
pub type OptionSet = BTreeMap<String, PrecisionOrder>;
