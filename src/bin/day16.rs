use std::cell::Cell;
use std::cmp;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::ops::Range;
use std::str::FromStr;
use std::time::Instant;

use once_cell::sync::Lazy;
use regex_lite::Regex;
use thiserror::Error;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

const START: &str = "AA";
const SOLO_MINUTES: usize = 30;
const PAIR_MINUTES: usize = 26;

const USAGE: &str = "usage: day16 [part1|part2] [INPUT]";

// eg: Valve AA has flow rate=0; tunnels lead to valves DD, II, BB
static LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Valve (\w+) has flow rate=(\d+); tunnels? leads? to valves? (.*)$").unwrap()
});

#[derive(Debug, Error, PartialEq)]
enum ParseError {
    #[error("line {line_no}: unexpected line format: {line}")]
    Line { line_no: usize, line: String },
    #[error("line {line_no}: bad flow rate {rate:?}")]
    FlowRate { line_no: usize, rate: String },
    #[error("line {line_no}: valve {name} is declared more than once")]
    Duplicate { line_no: usize, name: String },
    #[error("line {line_no}: tunnel leads to undeclared valve {name}")]
    UnknownValve { line_no: usize, name: String },
    #[error("{0} valves declared, at most {max} are supported", max = Footprint::CAPACITY)]
    TooManyValves(usize),
    #[error("no valve named {0}")]
    MissingValve(String),
}

#[derive(Debug, Error, PartialEq)]
enum SearchError {
    #[error("released pressure overflows after opening valve {0}")]
    Overflow(String),
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct RoomHandle(u8);

impl RoomHandle {
    fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for RoomHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Set of rooms a search branch no longer needs to consider, either because their valve is
/// already open or because it has no flow. Copied rather than mutated, so sibling branches never
/// see each other's additions.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
struct Footprint(u64);

impl Footprint {
    const CAPACITY: usize = u64::BITS as usize;

    fn contains(self, rh: RoomHandle) -> bool {
        self.0 & (1 << rh.0) != 0
    }

    fn with(self, rh: RoomHandle) -> Self {
        Footprint(self.0 | (1 << rh.0))
    }

    fn union(self, other: Self) -> Self {
        Footprint(self.0 | other.0)
    }

    fn without(self, other: Self) -> Self {
        Footprint(self.0 & !other.0)
    }

    fn len(self) -> usize {
        self.0.count_ones() as usize
    }
}

impl FromIterator<RoomHandle> for Footprint {
    fn from_iter<I: IntoIterator<Item=RoomHandle>>(iter: I) -> Self {
        iter.into_iter().fold(Footprint::default(), |fp, rh| fp.with(rh))
    }
}

impl fmt::Debug for Footprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#b}", self.0)
    }
}

struct Volcano {
    graph: SquareArray,
    flow_for: Vec<usize>,
    name_for: Vec<String>,
    handle_for: HashMap<String, RoomHandle>,
}

impl Volcano {
    fn len(&self) -> usize {
        self.flow_for.len()
    }

    fn rooms(&self) -> impl Iterator<Item=RoomHandle> {
        (0..self.len()).map(|i| RoomHandle(i as u8))
    }

    fn handle(&self, name: &str) -> Result<RoomHandle, ParseError> {
        self.handle_for.get(name)
            .copied()
            .ok_or_else(|| ParseError::MissingValve(name.to_string()))
    }

    fn useful(&self) -> Vec<RoomHandle> {
        self.rooms().filter(|rh| self.flow_for[rh.as_usize()] > 0).collect()
    }

    fn zero_flow(&self) -> Footprint {
        self.rooms().filter(|rh| self.flow_for[rh.as_usize()] == 0).collect()
    }
}

impl FromStr for Volcano {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Handles are assigned in declaration order, so every valve needs to be seen before
        // tunnels can be resolved.
        let mut records: Vec<(usize, RoomHandle, &str)> = Vec::new();
        let mut flow_for = Vec::new();
        let mut name_for = Vec::new();
        let mut handle_for: HashMap<String, RoomHandle> = HashMap::new();

        for (i, line) in s.lines().enumerate() {
            let line_no = i + 1;
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            let Some(caps) = LINE_RE.captures(line) else {
                return Err(ParseError::Line { line_no, line: line.to_string() });
            };
            let (Some(name), Some(rate), Some(adjacent)) = (caps.get(1), caps.get(2), caps.get(3)) else {
                return Err(ParseError::Line { line_no, line: line.to_string() });
            };
            let name = name.as_str();

            if handle_for.contains_key(name) {
                return Err(ParseError::Duplicate { line_no, name: name.to_string() });
            }
            if handle_for.len() == Footprint::CAPACITY {
                return Err(ParseError::TooManyValves(s.lines().filter(|l| !l.trim().is_empty()).count()));
            }

            let flow_rate = rate.as_str().parse::<u32>()
                .map(|rate| rate as usize)
                .map_err(|_| ParseError::FlowRate { line_no, rate: rate.as_str().to_string() })?;

            let src = RoomHandle(handle_for.len() as u8);
            handle_for.insert(name.to_string(), src);
            name_for.push(name.to_string());
            flow_for.push(flow_rate);
            records.push((line_no, src, adjacent.as_str()));
        }

        let mut graph = SquareArray::new(flow_for.len());
        for (line_no, src, adjacent) in records {
            graph.set(src, src, Some(0));
            for name in adjacent.split(", ") {
                let dst = *handle_for.get(name)
                    .ok_or_else(|| ParseError::UnknownValve { line_no, name: name.to_string() })?;
                if dst != src {
                    graph.set(src, dst, Some(1));
                    graph.set(dst, src, Some(1));
                }
            }
        }

        let volcano = Volcano { graph, flow_for, name_for, handle_for };
        debug!(valves = volcano.len(), useful = volcano.useful().len(), "parsed volcano");
        Ok(volcano)
    }
}


/// Row-major travel times between rooms, where `None` means no known path.
#[derive(Clone)]
struct SquareArray {
    cols: usize,
    data: Vec<Option<usize>>,
}

impl SquareArray {
    fn new(cols: usize) -> Self {
        Self { cols, data: vec![None; cols * cols] }
    }

    fn get_raw(&self, src: usize, dst: usize) -> Option<usize> {
        self.data[src * self.cols + dst]
    }

    fn set_raw(&mut self, src: usize, dst: usize, v: Option<usize>) {
        self.data[src * self.cols + dst] = v;
    }

    fn get(&self, src: RoomHandle, dst: RoomHandle) -> Option<usize> {
        self.get_raw(src.as_usize(), dst.as_usize())
    }

    fn set(&mut self, src: RoomHandle, dst: RoomHandle, v: Option<usize>) {
        self.set_raw(src.as_usize(), dst.as_usize(), v);
    }
}

impl fmt::Display for SquareArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for src in 0..self.cols {
            for dst in 0..self.cols {
                match self.get_raw(src, dst) {
                    Some(w) => write!(f, "{:>3}", w)?,
                    None => write!(f, "{:>3}", "-")?,
                }
            }
            writeln!(f)?
        }
        Ok(())
    }
}

// Floyd-Warshall. The middleman loop has to be outermost: after iteration `mid`, every entry
// holds the shortest path whose intermediate rooms all come from 0..=mid.
fn shortest_paths(weights: &SquareArray) -> SquareArray {
    let mut min_weights = weights.clone();
    let n = min_weights.cols;
    for mid in 0..n {  // "mid" is short for "middleman"
        for src in 0..n {
            for dst in 0..n {
                let direct = min_weights.get_raw(src, dst);
                let b = min_weights.get_raw(src, mid);
                let c = min_weights.get_raw(mid, dst);
                let mediated = if let (Some(b), Some(c)) = (b, c) {
                    Some(b + c)
                } else {
                    None
                };
                min_weights.set_raw(src, dst, inner_min(direct, mediated));
            }
        }
    }
    min_weights
}

fn inner_min<T: Ord>(a: Option<T>, b: Option<T>) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(cmp::min(a, b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        _ => None,
    }
}

/// Exhaustive depth-first search over orderings of the valves that are still worth opening.
struct ReleaseSearch<'a> {
    flow_for: &'a [usize],
    name_for: &'a [String],
    dists: &'a SquareArray,
    zero_flow: Footprint,
    nstates: Cell<usize>,
}

impl<'a> ReleaseSearch<'a> {
    fn new(volcano: &'a Volcano, dists: &'a SquareArray) -> Self {
        ReleaseSearch {
            flow_for: &volcano.flow_for,
            name_for: &volcano.name_for,
            dists,
            zero_flow: volcano.zero_flow(),
            nstates: Cell::new(0),
        }
    }

    fn nstates(&self) -> usize {
        self.nstates.get()
    }

    fn rooms(&self) -> impl Iterator<Item=RoomHandle> {
        (0..self.flow_for.len()).map(|i| RoomHandle(i as u8))
    }

    /// Most pressure that can be released by walking from `room` and opening valves outside
    /// `footprint` within `minutes_left`. Opening a valve takes a minute on top of the walk.
    fn max_release(&self, room: RoomHandle, minutes_left: usize, footprint: Footprint) -> Result<usize, SearchError> {
        self.nstates.set(self.nstates.get() + 1);

        if footprint.len() == self.flow_for.len() || minutes_left == 0 {
            return Ok(0);
        }

        let mut best = 0;
        for next in self.rooms().filter(|&rh| !footprint.contains(rh)) {
            // Unreachable rooms never contribute.
            let Some(travel) = self.dists.get(room, next) else {
                continue;
            };
            if minutes_left < travel + 1 {
                continue;
            }
            let left = minutes_left - travel - 1;
            let rest = self.max_release(next, left, footprint.with(next))?;
            let released = self.flow_for[next.as_usize()].checked_mul(left)
                .and_then(|r| r.checked_add(rest))
                .ok_or_else(|| self.overflow(next))?;
            best = cmp::max(best, released);
        }
        Ok(best)
    }

    /// Combined release when `mine` are reserved for one agent and the rest of `useful` for the
    /// other, both starting at `start` with `minutes` each.
    fn split_release(&self, start: RoomHandle, minutes: usize, useful: Footprint, mine: Footprint) -> Result<usize, SearchError> {
        let theirs = useful.without(mine);
        let ours = self.max_release(start, minutes, self.zero_flow.union(theirs))?;
        let partner = self.max_release(start, minutes, self.zero_flow.union(mine))?;
        ours.checked_add(partner).ok_or_else(|| self.overflow(start))
    }

    fn overflow(&self, rh: RoomHandle) -> SearchError {
        SearchError::Overflow(self.name_for[rh.as_usize()].clone())
    }

    fn max_release_with_partner(&self, start: RoomHandle, minutes: usize, useful: &[RoomHandle]) -> Result<usize, SearchError> {
        let all_useful: Footprint = useful.iter().copied().collect();
        let sizes = partition_sizes(useful.len());
        if sizes.is_empty() {
            warn!(useful = useful.len(), "too few useful valves to split between two agents");
        }

        let mut best = 0;
        for n in sizes {
            for mine in Combinations::new(useful, n) {
                best = cmp::max(best, self.split_release(start, minutes, all_useful, mine)?);
            }
            debug!(n, best, nstates = self.nstates(), "finished splits");
        }
        Ok(best)
    }
}

// The first agent gets between 1 and len/2 - 1 valves. The exact-half split, and the split where
// one agent gets nothing, are not enumerated.
fn partition_sizes(useful: usize) -> Range<usize> {
    1..useful / 2
}

/// k-subsets of `items` in lexicographic order of their indices.
struct Combinations<'a> {
    items: &'a [RoomHandle],
    indices: Vec<usize>,
    done: bool,
}

impl<'a> Combinations<'a> {
    fn new(items: &'a [RoomHandle], k: usize) -> Self {
        Combinations { items, indices: (0..k).collect(), done: k > items.len() }
    }
}

impl Iterator for Combinations<'_> {
    type Item = Footprint;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let current = self.indices.iter().map(|&i| self.items[i]).collect();

        // Bump the rightmost index that still has room, then pack the ones after it.
        let n = self.items.len();
        let k = self.indices.len();
        match (0..k).rev().find(|&i| self.indices[i] != i + n - k) {
            Some(i) => {
                self.indices[i] += 1;
                for j in (i + 1)..k {
                    self.indices[j] = self.indices[j - 1] + 1;
                }
            },
            None => self.done = true,
        }
        Some(current)
    }
}

fn part1(input: &str) -> Result<usize, Box<dyn Error>> {
    let start_time = Instant::now();
    let volcano = Volcano::from_str(input)?;
    let dists = shortest_paths(&volcano.graph);
    let search = ReleaseSearch::new(&volcano, &dists);
    let best = search.max_release(volcano.handle(START)?, SOLO_MINUTES, volcano.zero_flow())?;
    debug!(elapsed = ?start_time.elapsed(), nstates = search.nstates(), "part1 done");
    Ok(best)
}

fn part2(input: &str) -> Result<usize, Box<dyn Error>> {
    let start_time = Instant::now();
    let volcano = Volcano::from_str(input)?;
    let dists = shortest_paths(&volcano.graph);
    let search = ReleaseSearch::new(&volcano, &dists);
    let best = search.max_release_with_partner(volcano.handle(START)?, PAIR_MINUTES, &volcano.useful())?;
    debug!(elapsed = ?start_time.elapsed(), nstates = search.nstates(), "part2 done");
    Ok(best)
}

fn read_input(path: Option<&str>) -> io::Result<String> {
    match path {
        Some(path) => fs::read_to_string(path),
        None => io::read_to_string(io::stdin().lock()),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).init();
}

fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();
    let args: Vec<String> = std::env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    let (part, path) = match args[..] {
        [] => (None, None),
        [part @ ("part1" | "part2")] => (Some(part), None),
        [part @ ("part1" | "part2"), path] => (Some(part), Some(path)),
        [path] => (None, Some(path)),
        _ => return Err(USAGE.into()),
    };

    let input = read_input(path)?;
    match part {
        Some("part1") => println!("{}", part1(&input)?),
        Some(_) => println!("{}", part2(&input)?),
        None => {
            println!("{}", part1(&input)?);
            println!("{}", part2(&input)?);
        },
    }
    Ok(())
}
