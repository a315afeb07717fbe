//! Parser for request and result artifacts.
//!
//! Grammar, one record per line, fields separated by spaces or tabs:
//!
//! ```text
//! request := "M" int EOL "K" int EOL "N" int EOL "A" decimal* EOL "B" decimal* EOL
//! result  := "C" decimal* EOL
//! ```
//!
//! Decimals are anything `f32::from_str` accepts, which includes `NaN` and
//! `inf`. Element counts are not checked here; see [`crate::artifact`].

use nom::IResult;
use nom::branch::alt;
use nom::bytes::complete::{tag, take_till1};
use nom::character::complete::{digit1, line_ending, multispace0, space0, space1};
use nom::combinator::{all_consuming, eof, map_res};
use nom::multi::many0;
use nom::sequence::{pair, preceded, terminated};

/// Dimensions and flat operand values of a request record.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRequest {
    pub m: usize,
    pub k: usize,
    pub n: usize,
    pub a: Vec<f32>,
    pub b: Vec<f32>,
}

fn decimal(input: &str) -> IResult<&str, f32> {
    map_res(take_till1(|c: char| c.is_whitespace()), str::parse::<f32>)(input)
}

fn end_of_line(input: &str) -> IResult<&str, &str> {
    preceded(space0, alt((line_ending, eof)))(input)
}

fn dimension<'a>(name: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, usize> {
    terminated(
        preceded(pair(tag(name), space1), map_res(digit1, str::parse::<usize>)),
        end_of_line,
    )
}

fn values<'a>(name: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, Vec<f32>> {
    terminated(
        preceded(tag(name), many0(preceded(space1, decimal))),
        end_of_line,
    )
}

/// Parses a complete request artifact.
pub fn request(input: &str) -> IResult<&str, RawRequest> {
    let (input, m) = dimension("M")(input)?;
    let (input, k) = dimension("K")(input)?;
    let (input, n) = dimension("N")(input)?;
    let (input, a) = values("A")(input)?;
    let (input, b) = all_consuming(terminated(values("B"), multispace0))(input)?;
    Ok((input, RawRequest { m, k, n, a, b }))
}

/// Parses a complete result artifact into its flat values.
pub fn result(input: &str) -> IResult<&str, Vec<f32>> {
    all_consuming(terminated(values("C"), multispace0))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_request() {
        let text = "M 2\nK 3\nN 1\nA 1 2 3 4 5 6\nB -0.5 1e-3 inf\n";
        let (_, raw) = request(text).unwrap();
        assert_eq!((raw.m, raw.k, raw.n), (2, 3, 1));
        assert_eq!(raw.a, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(raw.b[0], -0.5);
        assert_eq!(raw.b[1], 1e-3);
        assert!(raw.b[2].is_infinite());
    }

    #[test]
    fn tolerates_crlf_and_trailing_spaces() {
        let text = "M 1\r\nK 1 \r\nN 1\r\nA 2.5  \r\nB\t4\r\n\r\n";
        let (_, raw) = request(text).unwrap();
        assert_eq!(raw.a, vec![2.5]);
        assert_eq!(raw.b, vec![4.0]);
    }

    #[test]
    fn parses_result_with_special_values() {
        let (_, c) = result("C 19 22 NaN -0\n").unwrap();
        assert_eq!(c.len(), 4);
        assert_eq!(c[1], 22.0);
        assert!(c[2].is_nan());
        assert_eq!(c[3].to_bits(), (-0.0f32).to_bits());
    }

    #[test]
    fn result_without_newline() {
        let (_, c) = result("C 1.5").unwrap();
        assert_eq!(c, vec![1.5]);
    }

    #[test]
    fn rejects_bad_records() {
        assert!(result("D 1 2\n").is_err());
        assert!(result("C 1 x2\n").is_err());
        assert!(result("C 1\nC 2\n").is_err());
        assert!(request("M 1\nN 1\nK 1\nA 1\nB 1\n").is_err());
        assert!(request("M -1\nK 1\nN 1\nA 1\nB 1\n").is_err());
    }

    #[test]
    fn empty_record_parses_to_no_values() {
        let (_, c) = result("C\n").unwrap();
        assert!(c.is_empty());
    }
}
