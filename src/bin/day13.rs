use std::cmp::Ordering;
use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::iter::Enumerate;
use std::slice;
use std::str::{FromStr, Lines};
use std::time::Instant;

use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: day13 [part1|part2] [INPUT]";

#[derive(Debug, Error, PartialEq)]
enum SyntaxError {
    #[error("unexpected byte {byte:?} at offset {offset}")]
    UnexpectedByte { offset: usize, byte: char },
    #[error("unexpected {token} at offset {offset}")]
    UnexpectedToken { offset: usize, token: String },
    #[error("integer out of range at offset {0}")]
    Overflow(usize),
    #[error("packet ends early")]
    UnexpectedEnd,
    #[error("trailing input at offset {0}")]
    Trailing(usize),
}

#[derive(Debug, Error, PartialEq)]
enum ParseError {
    #[error("line {line_no}: {source}: {line}")]
    Packet { line_no: usize, line: String, source: SyntaxError },
    #[error("line {line_no}: input should contain blank-line-delimited groups of 2 lines")]
    Pairing { line_no: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Packet {
    Int(i64),
    List(Vec<Packet>),
}

impl Packet {
    fn divider(n: i64) -> Self {
        Packet::List(vec![Packet::List(vec![Packet::Int(n)])])
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Packet::Int(n) => write!(f, "{n}"),
            Packet::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            },
        }
    }
}

impl FromStr for Packet {
    type Err = SyntaxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens: Vec<(usize, Token)> = Tokens::new(s).collect::<Result<_, _>>()?;
        let mut parser = Parser { tokens: &tokens, pos: 0 };
        let packet = parser.value()?;
        match parser.tokens.get(parser.pos) {
            None => Ok(packet),
            Some(&(offset, _)) => Err(SyntaxError::Trailing(offset)),
        }
    }
}

/// Orders packets element by element. An integer compared against a list is treated as a
/// one-element list, and a list that runs out first sorts first.
fn compare(a: &Packet, b: &Packet) -> Ordering {
    match (a, b) {
        (Packet::Int(a), Packet::Int(b)) => a.cmp(b),
        (Packet::List(a), Packet::List(b)) => compare_lists(a, b),
        (Packet::Int(_), Packet::List(b)) => compare_lists(slice::from_ref(a), b),
        (Packet::List(a), Packet::Int(_)) => compare_lists(a, slice::from_ref(b)),
    }
}

fn compare_lists(a: &[Packet], b: &[Packet]) -> Ordering {
    a.iter().zip(b)
        .map(|(a, b)| compare(a, b))
        .find(|ord| ord.is_ne())
        .unwrap_or_else(|| a.len().cmp(&b.len()))
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Int(i64),
    ListStart,
    ListEnd,
    Comma,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Int(n) => write!(f, "{n}"),
            Token::ListStart => write!(f, "'['"),
            Token::ListEnd => write!(f, "']'"),
            Token::Comma => write!(f, "','"),
        }
    }
}

struct Tokens<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Tokens<'a> {
    fn new(s: &'a str) -> Self {
        Tokens { bytes: s.as_bytes(), pos: 0 }
    }
}

impl Iterator for Tokens<'_> {
    type Item = Result<(usize, Token), SyntaxError>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.bytes.get(self.pos) == Some(&b' ') {
            self.pos += 1;
        }
        let offset = self.pos;
        let &b = self.bytes.get(offset)?;
        self.pos += 1;
        let token = match b {
            b'[' => Token::ListStart,
            b']' => Token::ListEnd,
            b',' => Token::Comma,
            b'-' | b'0'..=b'9' => {
                let sign = if b == b'-' { -1 } else { 1 };
                let mut n: i64 = 0;
                if b != b'-' {
                    self.pos -= 1;
                }
                let digits_start = self.pos;
                while let Some(&c) = self.bytes.get(self.pos).filter(|c| c.is_ascii_digit()) {
                    // Accumulate with the sign applied so i64::MIN still fits.
                    let next = n.checked_mul(10).and_then(|n| n.checked_add(sign * i64::from(c - b'0')));
                    let Some(next) = next else {
                        return Some(Err(SyntaxError::Overflow(offset)));
                    };
                    n = next;
                    self.pos += 1;
                }
                if self.pos == digits_start {
                    return Some(Err(SyntaxError::UnexpectedByte { offset, byte: '-' }));
                }
                Token::Int(n)
            },
            _ => return Some(Err(SyntaxError::UnexpectedByte { offset, byte: b as char })),
        };
        Some(Ok((offset, token)))
    }
}

struct Parser<'a> {
    tokens: &'a [(usize, Token)],
    pos: usize,
}

impl Parser<'_> {
    fn next(&mut self) -> Result<(usize, Token), SyntaxError> {
        let &token = self.tokens.get(self.pos).ok_or(SyntaxError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(token)
    }

    fn value(&mut self) -> Result<Packet, SyntaxError> {
        match self.next()? {
            (_, Token::Int(n)) => Ok(Packet::Int(n)),
            (_, Token::ListStart) => self.list(),
            (offset, token) => Err(unexpected(offset, token)),
        }
    }

    // Called just after the opening bracket.
    fn list(&mut self) -> Result<Packet, SyntaxError> {
        let mut items = Vec::new();
        if let Some((_, Token::ListEnd)) = self.tokens.get(self.pos) {
            self.pos += 1;
            return Ok(Packet::List(items));
        }
        loop {
            items.push(self.value()?);
            match self.next()? {
                (_, Token::Comma) => continue,
                (_, Token::ListEnd) => return Ok(Packet::List(items)),
                (offset, token) => return Err(unexpected(offset, token)),
            }
        }
    }
}

fn unexpected(offset: usize, token: Token) -> SyntaxError {
    SyntaxError::UnexpectedToken { offset, token: token.to_string() }
}

fn parse_line(i: usize, line: &str) -> Result<Packet, ParseError> {
    line.parse().map_err(|source| ParseError::Packet {
        line_no: i + 1,
        line: line.to_string(),
        source,
    })
}

struct PacketPairs<'a> {
    lines: Enumerate<Lines<'a>>,
}

impl<'a> PacketPairs<'a> {
    fn new(input: &'a str) -> Self {
        PacketPairs { lines: input.lines().enumerate() }
    }

    fn next_line(&mut self) -> Option<(usize, &'a str)> {
        self.lines.next().map(|(i, line)| (i, line.trim_end()))
    }
}

impl Iterator for PacketPairs<'_> {
    type Item = Result<(Packet, Packet), ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        let (i, a) = loop {
            let (i, line) = self.next_line()?;
            if !line.is_empty() {
                break (i, line);
            }
        };
        let (j, b) = match self.next_line() {
            Some((j, b)) if !b.is_empty() => (j, b),
            Some((j, _)) => return Some(Err(ParseError::Pairing { line_no: j + 1 })),
            None => return Some(Err(ParseError::Pairing { line_no: i + 2 })),
        };
        if let Some((k, line)) = self.next_line() {
            if !line.is_empty() {
                return Some(Err(ParseError::Pairing { line_no: k + 1 }));
            }
        }
        Some(parse_line(i, a).and_then(|a| Ok((a, parse_line(j, b)?))))
    }
}

fn part1(input: &str) -> Result<usize, ParseError> {
    let start_time = Instant::now();
    let mut sum = 0;
    for (i, pair) in PacketPairs::new(input).enumerate() {
        let (a, b) = pair?;
        if compare(&a, &b).is_le() {
            sum += i + 1;
        }
    }
    debug!(elapsed = ?start_time.elapsed(), "part1 done");
    Ok(sum)
}

fn part2(input: &str) -> Result<usize, ParseError> {
    let start_time = Instant::now();
    let mut packets: Vec<Packet> = Vec::new();
    for pair in PacketPairs::new(input) {
        let (a, b) = pair?;
        packets.push(a);
        packets.push(b);
    }
    debug!(packets = packets.len(), "parsed packets");

    let dividers = [Packet::divider(2), Packet::divider(6)];
    packets.extend(dividers.iter().cloned());
    packets.sort_by(compare);

    let key: usize = packets.iter()
        .enumerate()
        .filter(|(_, p)| dividers.contains(p))
        .map(|(i, _)| i + 1)
        .product();
    debug!(elapsed = ?start_time.elapsed(), "part2 done");
    Ok(key)
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

#[cfg(test)]
mod test {
    use super::*;

    const EXAMPLE: &str = "\
[1,1,3,1,1]
[1,1,5,1,1]

[[1],[2,3,4]]
[[1],4]

[9]
[[8,7,6]]

[[4,4],4,4]
[[4,4],4,4,4]

[7,7,7,7]
[7,7,7]

[]
[3]

[[[]]]
[[]]

[1,[2,[3,[4,[5,6,7]]]],8,9]
[1,[2,[3,[4,[5,6,0]]]],8,9]";

    fn packet(s: &str) -> Packet {
        s.parse().unwrap()
    }

    fn cmp_str(a: &str, b: &str) -> Ordering {
        compare(&packet(a), &packet(b))
    }

    fn example_packets() -> Vec<Packet> {
        PacketPairs::new(EXAMPLE)
            .map(Result::unwrap)
            .flat_map(|(a, b)| [a, b])
            .collect()
    }

    #[test]
    fn test_parse() {
        assert_eq!(packet("[]"), Packet::List(vec![]));
        assert_eq!(packet("10"), Packet::Int(10));
        assert_eq!(packet("[1,[2],[]]"), Packet::List(vec![
            Packet::Int(1),
            Packet::List(vec![Packet::Int(2)]),
            Packet::List(vec![]),
        ]));
        assert_eq!(packet("[[2]]"), Packet::divider(2));
    }

    #[test]
    fn test_parse_signs_and_spaces() {
        assert_eq!(packet("[1, [-2], 30]"), Packet::List(vec![
            Packet::Int(1),
            Packet::List(vec![Packet::Int(-2)]),
            Packet::Int(30),
        ]));
        assert_eq!(packet(" [ ] "), Packet::List(vec![]));
        assert_eq!(packet("-9223372036854775808"), Packet::Int(i64::MIN));
        assert_eq!(packet("9223372036854775807"), Packet::Int(i64::MAX));
        assert_eq!(packet("[1, -2]").to_string(), "[1,-2]");
    }

    #[test]
    fn test_display() {
        let s = "[1,[2,[3,[4,[5,6,7]]]],8,9]";
        assert_eq!(packet(s).to_string(), s);
        assert_eq!(packet("[[],[[]]]").to_string(), "[[],[[]]]");
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("[1,a]".parse::<Packet>(), Err(SyntaxError::UnexpectedByte { offset: 3, byte: 'a' }));
        assert_eq!("[1,2".parse::<Packet>(), Err(SyntaxError::UnexpectedEnd));
        assert_eq!("".parse::<Packet>(), Err(SyntaxError::UnexpectedEnd));
        assert_eq!("[1]]".parse::<Packet>(), Err(SyntaxError::Trailing(3)));
        assert_eq!("[1,,2]".parse::<Packet>(), Err(SyntaxError::UnexpectedToken {
            offset: 3,
            token: "','".to_string(),
        }));
        assert_eq!("[1 2]".parse::<Packet>(), Err(SyntaxError::UnexpectedToken {
            offset: 3,
            token: "2".to_string(),
        }));
        assert_eq!("[-]".parse::<Packet>(), Err(SyntaxError::UnexpectedByte { offset: 1, byte: '-' }));
        assert_eq!("[1,+2]".parse::<Packet>(), Err(SyntaxError::UnexpectedByte { offset: 3, byte: '+' }));
        assert_eq!("[99999999999999999999]".parse::<Packet>(), Err(SyntaxError::Overflow(1)));
        assert_eq!("[-99999999999999999999]".parse::<Packet>(), Err(SyntaxError::Overflow(1)));
    }

    #[test]
    fn test_packet_pairs_errors() {
        let err = part1("[1]\n[2]\n\n[3]\n[").err().unwrap();
        assert_eq!(err, ParseError::Packet {
            line_no: 5,
            line: "[".to_string(),
            source: SyntaxError::UnexpectedEnd,
        });
        assert_eq!(err.to_string(), "line 5: packet ends early: [");

        assert_eq!(part1("[1]\n[2]\n[3]").err(), Some(ParseError::Pairing { line_no: 3 }));
        assert_eq!(part1("[1]\n\n[2]").err(), Some(ParseError::Pairing { line_no: 2 }));
        assert_eq!(part2("[1]").err(), Some(ParseError::Pairing { line_no: 2 }));
    }

    #[test]
    fn test_cmp_lists() {
        assert_eq!(cmp_str("[1,2]", "[1,[2],3]"), Ordering::Less);
    }

    #[test]
    fn test_cmp_lists_long() {
        let a = "[[10,[0,7,[],3,[1,6]],[[2,4,5,4]],[]],[],[6,6,[[2,6,7],7,[5],[8,4,10,4,8],[0]],[10],[]],[[[],[6,0,9,10,2],8,[0]]]]";
        let b = "[[[6]],[[3],[[]],[[0,6,8,9,5],[7,9,10,2]]],[],[[[1],[9],5],9,[[],[0],5,1,[5,0]],5]]";
        assert_eq!(cmp_str(a, b), Ordering::Greater);
    }

    #[test]
    fn test_cmp_lists_multi_promotion() {
        assert_eq!(cmp_str("[[3]]", "[[[[],[]]]]"), Ordering::Greater);
        assert_eq!(cmp_str("[[3,2,4],[1,[2,3,[5,1,8],7,9]],[[4,[]]]]", "[[[[],[],6],3]]"), Ordering::Greater);
    }

    #[test]
    fn test_cmp_examples() {
        assert_eq!(cmp_str("[1,1,3,1,1]", "[1,1,5,1,1]"), Ordering::Less);
        assert_eq!(cmp_str("[[1],[2,3,4]]", "[[1],4]"), Ordering::Less);
        assert_eq!(cmp_str("[9]", "[[8,7,6]]"), Ordering::Greater);
        assert_eq!(cmp_str("[7,7,7,7]", "[7,7,7]"), Ordering::Greater);
        assert_eq!(cmp_str("[-1]", "[0]"), Ordering::Less);
        assert_eq!(cmp_str("[[-3]]", "-4"), Ordering::Greater);
    }

    #[test]
    fn test_cmp_ints() {
        for a in -6..6 {
            for b in -6..6 {
                let want = (a - b).cmp(&0);
                assert_eq!(compare(&Packet::Int(a), &Packet::Int(b)), want, "{a} vs {b}");
            }
        }
    }

    #[test]
    fn test_cmp_prefix() {
        assert_eq!(cmp_str("[]", "[3]"), Ordering::Less);
        assert_eq!(cmp_str("[[4,4],4,4]", "[[4,4],4,4,4]"), Ordering::Less);
        assert_eq!(cmp_str("[[4,4],4,4]", "[[4,4],4,4]"), Ordering::Equal);
        assert_eq!(cmp_str("[[[]]]", "[[]]"), Ordering::Greater);
        // Promotion makes these equal even though they differ structurally.
        assert_eq!(cmp_str("[1]", "1"), Ordering::Equal);
        assert_eq!(cmp_str("[[1]]", "[1]"), Ordering::Equal);
    }

    #[test]
    fn test_cmp_antisymmetric() {
        let mut packets = example_packets();
        packets.extend([Packet::divider(2), Packet::divider(6), packet("2"), packet("[2]")]);
        for a in &packets {
            assert_eq!(compare(a, a), Ordering::Equal);
            for b in &packets {
                assert_eq!(compare(a, b), compare(b, a).reverse(), "{a} vs {b}");
            }
        }
    }

    #[test]
    fn test_sort_deterministic() {
        let mut first = example_packets();
        let mut second = example_packets();
        second.reverse();
        first.sort_by(compare);
        second.sort_by(compare);
        assert_eq!(first, second);
        assert_eq!(first[0], packet("[]"));
        assert_eq!(first.last(), Some(&packet("[9]")));

        let mut again = first.clone();
        again.sort_by(compare);
        assert_eq!(again, first);
    }

    #[test]
    fn test_part1() {
        assert_eq!(part1(EXAMPLE).unwrap(), 13);
    }

    #[test]
    fn test_part1_counts_equal_pairs() {
        assert_eq!(part1("[1]\n[1]\n\n[2]\n[1]\n\n[1]\n[[1]]").unwrap(), 1 + 3);
    }

    #[test]
    fn test_part2() {
        assert_eq!(part2(EXAMPLE).unwrap(), 140);
    }
}
