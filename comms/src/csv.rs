//! Delimited text form of a parameter collection.
//!
//! The header row is `index,meanX,meanY,sigmaX,sigmaY[,sigmaXY],weight` and each data row
//! holds one primitive in ascending index order. Whether the cross term is present is read
//! from the header alone, a file carries no other flag.

use std::{collections::HashSet, error::Error, fmt, fmt::Write as _};

use log::debug;

use crate::specs::params::{GaussianParam, ParamSet};

const BASE_FIELDS: usize = 6;
const COVARIANCE_TOKEN: &str = "sigmaxy";

/// Parameter text decoding failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The text held no row that could be turned into a primitive.
    EmptyParameterSet,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyParameterSet => write!(f, "no valid parameter rows found"),
        }
    }
}

impl Error for CodecError {}

/// Encodes a parameter collection as text.
///
/// # Arguments
/// * `params` - The primitives to encode, in any order.
/// * `has_covariance` - Whether to emit the `sigmaXY` column.
///
/// # Returns
/// The header row followed by one row per primitive, sorted by index.
pub fn encode(params: &[GaussianParam], has_covariance: bool) -> String {
    let mut sorted: Vec<_> = params.iter().collect();
    sorted.sort_by_key(|p| p.index);

    let mut out = String::from(if has_covariance {
        "index,meanX,meanY,sigmaX,sigmaY,sigmaXY,weight\n"
    } else {
        "index,meanX,meanY,sigmaX,sigmaY,weight\n"
    });

    // Writing into a `String` cannot fail.
    for p in sorted {
        let _ = write!(
            out,
            "{},{},{},{},{}",
            p.index, p.mean_x, p.mean_y, p.sigma_x, p.sigma_y
        );
        if has_covariance {
            let _ = write!(out, ",{}", p.sigma_xy.unwrap_or(0.0));
        }
        let _ = writeln!(out, ",{}", p.weight);
    }

    out
}

/// Decodes text produced by [`encode`], or by the service's own export.
///
/// Rows with too few fields or with a field that is not a number are skipped, as are
/// rows repeating an index already seen, the first occurrence is kept.
///
/// # Returns
/// The decoded collection, or `EmptyParameterSet` if no row survived.
pub fn decode(text: &str) -> Result<ParamSet, CodecError> {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());

    let has_covariance = lines
        .next()
        .map(|header| header.split(',').any(|t| normalize(t) == COVARIANCE_TOKEN))
        .unwrap_or(false);

    let needed = if has_covariance {
        BASE_FIELDS + 1
    } else {
        BASE_FIELDS
    };

    let mut params = Vec::new();
    let mut seen = HashSet::new();
    for (row, line) in lines.enumerate() {
        let fields: Vec<_> = line.split(',').map(str::trim).collect();
        if fields.len() < needed {
            debug!(row = row, fields = fields.len(); "skipping short parameter row");
            continue;
        }

        match parse_row(&fields, has_covariance) {
            Some(param) if seen.insert(param.index) => params.push(param),
            Some(param) => {
                debug!(row = row, index = param.index; "skipping duplicate parameter index")
            }
            None => debug!(row = row; "skipping non-numeric parameter row"),
        }
    }

    if params.is_empty() {
        return Err(CodecError::EmptyParameterSet);
    }

    Ok(ParamSet::new(params, has_covariance))
}

fn normalize(token: &str) -> String {
    token
        .trim()
        .trim_matches('"')
        .chars()
        .filter(|c| *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

fn parse_row(fields: &[&str], has_covariance: bool) -> Option<GaussianParam> {
    let num = |i: usize| fields[i].trim_matches('"').parse::<f32>().ok();

    let (sigma_xy, weight) = if has_covariance {
        (Some(num(5)?), num(6)?)
    } else {
        (None, num(5)?)
    };

    Some(GaussianParam {
        index: fields[0].trim_matches('"').parse().ok()?,
        mean_x: num(1)?,
        mean_y: num(2)?,
        sigma_x: num(3)?,
        sigma_y: num(4)?,
        sigma_xy,
        weight,
    })
}
