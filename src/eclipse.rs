// Eclipse .grdecl keyword reader

use crate::error::ParseError;
use log::debug;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Keywords whose data are integers.
pub const INTEGER_KEYWORDS: &[&str] = &["SPECGRID", "DIMENS", "ACTNUM"];

/// Keywords whose data are floating-point numbers.
pub const FLOATING_KEYWORDS: &[&str] = &[
    "DXV", "DYV", "DZV", "PERMX", "PERMY", "PERMZ", "PORO", "TOPS", "COORD", "ZCORN", "MULTPV",
];

/// Keywords that stand alone without a data section.
const NO_DATA_KEYWORDS: &[&str] = &[
    "ECHO", "NOECHO", "RUNSPEC", "GRID", "EDIT", "PROPS", "REGIONS", "SOLUTION", "SUMMARY",
    "SCHEDULE", "END",
];

/// All integer and floating-point fields of a `.grdecl` file.
///
/// Data sections are read in full on construction, after which every field is
/// available by keyword. Keywords the reader does not know are skipped.
#[derive(Debug, Clone, Default)]
pub struct EclipseGridParser {
    integer_fields: BTreeMap<String, Vec<i32>>,
    floating_fields: BTreeMap<String, Vec<f64>>,
}

impl EclipseGridParser {
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ParseError> {
        let mut parser = Self::default();
        parser.read(reader)?;
        Ok(parser)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ParseError> {
        Self::from_reader(File::open(path)?)
    }

    /// Read the given input, dropping anything read before.
    pub fn read<R: Read>(&mut self, mut reader: R) -> Result<(), ParseError> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;

        self.integer_fields.clear();
        self.floating_fields.clear();

        let mut tokens = text
            .lines()
            .map(|line| line.split("--").next().unwrap_or(""))
            .flat_map(str::split_whitespace);

        while let Some(token) = tokens.next() {
            if !is_keyword(token) {
                return Err(ParseError::StrayData(token.to_string()));
            }
            let keyword = token.to_string();
            if NO_DATA_KEYWORDS.contains(&keyword.as_str()) {
                continue;
            }

            let mut data = Vec::new();
            let mut terminated = false;
            for token in tokens.by_ref() {
                if let Some(head) = token.strip_suffix('/') {
                    if !head.is_empty() {
                        data.push(head);
                    }
                    terminated = true;
                    break;
                }
                data.push(token);
            }
            if !terminated {
                return Err(ParseError::Unterminated(keyword));
            }

            if INTEGER_KEYWORDS.contains(&keyword.as_str()) {
                // SPECGRID ends with a coordinate-type flag that is not a number
                if keyword == "SPECGRID" {
                    data.truncate(4);
                }
                let values = expand(&keyword, &data, parse_integer)?;
                self.integer_fields.insert(keyword, values);
            } else if FLOATING_KEYWORDS.contains(&keyword.as_str()) {
                let values = expand(&keyword, &data, parse_floating)?;
                self.floating_fields.insert(keyword, values);
            } else {
                debug!("skipping unsupported keyword {} ({} tokens)", keyword, data.len());
            }
        }
        Ok(())
    }

    pub fn has_field(&self, keyword: &str) -> bool {
        self.integer_fields.contains_key(keyword) || self.floating_fields.contains_key(keyword)
    }

    pub fn has_fields(&self, keywords: &[&str]) -> bool {
        keywords.iter().all(|k| self.has_field(k))
    }

    pub fn field_names(&self) -> Vec<String> {
        self.integer_fields
            .keys()
            .chain(self.floating_fields.keys())
            .cloned()
            .collect()
    }

    /// Values of an integer keyword, empty if the file did not contain it.
    pub fn integer_value(&self, keyword: &str) -> &[i32] {
        self.integer_fields
            .get(keyword)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Values of a floating-point keyword, empty if the file did not contain it.
    pub fn floating_point_value(&self, keyword: &str) -> &[f64] {
        self.floating_fields
            .get(keyword)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

fn is_keyword(token: &str) -> bool {
    let mut chars = token.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

fn parse_integer(token: &str) -> Option<i32> {
    token.parse().ok()
}

fn parse_floating(token: &str) -> Option<f64> {
    // Fortran-style exponents, e.g. 1.0D+02
    token.replace(['D', 'd'], "E").parse().ok()
}

/// Expand `N*value` repeat counts and parse every value.
fn expand<T: Copy>(
    keyword: &str,
    tokens: &[&str],
    parse: fn(&str) -> Option<T>,
) -> Result<Vec<T>, ParseError> {
    let bad_number = |token: &str| ParseError::BadNumber {
        keyword: keyword.to_string(),
        token: token.to_string(),
    };
    let mut values = Vec::with_capacity(tokens.len());
    for &token in tokens {
        match token.split_once('*') {
            Some((count, value)) => {
                if value.is_empty() {
                    return Err(ParseError::BadRepeat {
                        keyword: keyword.to_string(),
                        token: token.to_string(),
                    });
                }
                let count: usize = count.parse().map_err(|_| bad_number(token))?;
                let value = parse(value).ok_or_else(|| bad_number(token))?;
                values.extend(std::iter::repeat(value).take(count));
            }
            None => values.push(parse(token).ok_or_else(|| bad_number(token))?),
        }
    }
    Ok(values)
}
