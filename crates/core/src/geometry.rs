//! Well-known-text geometry parsing for cached bounding boxes.
//!
//! Supports `POINT`, `LINESTRING`, `POLYGON`, their `MULTI*` variants and
//! `GEOMETRYCOLLECTION`, with optional `Z`/`M`/`ZM` dimension markers,
//! `EMPTY` members and an `SRID=<n>;` prefix. Only the first two ordinates
//! of each coordinate contribute to the bounds.

use serde::Serialize;

use crate::error::CoreError;

/// Cached bounding box. All four values are `None` for empty geometry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Bounds {
    pub xmin: Option<f64>,
    pub xmax: Option<f64>,
    pub ymin: Option<f64>,
    pub ymax: Option<f64>,
}

impl Bounds {
    fn include(&mut self, x: f64, y: f64) {
        self.xmin = Some(self.xmin.map_or(x, |v| v.min(x)));
        self.xmax = Some(self.xmax.map_or(x, |v| v.max(x)));
        self.ymin = Some(self.ymin.map_or(y, |v| v.min(y)));
        self.ymax = Some(self.ymax.map_or(y, |v| v.max(y)));
    }

    pub fn is_empty(&self) -> bool {
        self.xmin.is_none()
    }
}

/// Compute the bounds of a WKT string.
///
/// Blank input yields empty bounds; unparsable non-blank input is a
/// validation error on the `geometry` field.
pub fn bounds(wkt: &str) -> Result<Bounds, CoreError> {
    if wkt.trim().is_empty() {
        return Ok(Bounds::default());
    }
    parse(wkt).map_err(|msg| CoreError::field("geometry", msg))
}

/// Check that `wkt` parses, returning a human-readable message otherwise.
pub fn validate_wkt(wkt: &str) -> Result<(), String> {
    parse(wkt).map(|_| ())
}

fn parse(wkt: &str) -> Result<Bounds, String> {
    let body = strip_srid(wkt.trim())?;
    let tokens = tokenize(body)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        bounds: Bounds::default(),
    };
    parser.geometry()?;
    if parser.pos != parser.tokens.len() {
        return Err(format!(
            "Unexpected trailing content in geometry near token {}",
            parser.pos + 1
        ));
    }
    Ok(parser.bounds)
}

fn strip_srid(wkt: &str) -> Result<&str, String> {
    let upper = wkt.get(..5).map(str::to_ascii_uppercase);
    if upper.as_deref() != Some("SRID=") {
        return Ok(wkt);
    }
    let (srid, rest) = wkt[5..]
        .split_once(';')
        .ok_or_else(|| "SRID prefix must end with ';'".to_string())?;
    srid.trim()
        .parse::<i32>()
        .map_err(|_| format!("Invalid SRID: \"{}\"", srid.trim()))?;
    Ok(rest.trim())
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Number(f64),
    Open,
    Close,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            c if c.is_ascii_alphabetic() => {
                let mut end = start;
                while let Some(&(i, c)) = chars.peek() {
                    if !c.is_ascii_alphabetic() {
                        break;
                    }
                    end = i + c.len_utf8();
                    chars.next();
                }
                tokens.push(Token::Word(input[start..end].to_ascii_uppercase()));
            }
            c if c.is_ascii_digit() || matches!(c, '-' | '+' | '.') => {
                let mut end = start;
                let mut prev = ' ';
                while let Some(&(i, c)) = chars.peek() {
                    let part_of_number = c.is_ascii_digit()
                        || c == '.'
                        || c == 'e'
                        || c == 'E'
                        || (matches!(c, '-' | '+') && (i == start || matches!(prev, 'e' | 'E')));
                    if !part_of_number {
                        break;
                    }
                    prev = c;
                    end = i + c.len_utf8();
                    chars.next();
                }
                let text = &input[start..end];
                let value: f64 = text
                    .parse()
                    .map_err(|_| format!("Invalid coordinate value: \"{text}\""))?;
                if !value.is_finite() {
                    return Err(format!("Coordinate is not finite: \"{text}\""));
                }
                tokens.push(Token::Number(value));
            }
            other => return Err(format!("Unexpected character in geometry: '{other}'")),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    bounds: Bounds,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), String> {
        match self.next() {
            Some(ref t) if *t == expected => Ok(()),
            Some(t) => Err(format!("Expected {expected:?}, found {t:?}")),
            None => Err(format!("Expected {expected:?}, found end of input")),
        }
    }

    fn word(&mut self) -> Result<String, String> {
        match self.next() {
            Some(Token::Word(w)) => Ok(w),
            Some(t) => Err(format!("Expected a geometry type, found {t:?}")),
            None => Err("Expected a geometry type, found end of input".to_string()),
        }
    }

    /// Consumes an optional dimension marker and an optional `EMPTY`.
    /// Returns `true` when the geometry is empty.
    fn header(&mut self) -> Result<bool, String> {
        if let Some(Token::Word(w)) = self.peek() {
            if matches!(w.as_str(), "Z" | "M" | "ZM") {
                self.pos += 1;
            }
        }
        if let Some(Token::Word(w)) = self.peek() {
            if w == "EMPTY" {
                self.pos += 1;
                return Ok(true);
            }
            return Err(format!("Unexpected keyword \"{w}\""));
        }
        Ok(false)
    }

    fn geometry(&mut self) -> Result<(), String> {
        let kind = self.word()?;
        if self.header()? {
            return Ok(());
        }
        match kind.as_str() {
            "POINT" => {
                self.expect(Token::Open)?;
                self.coordinate()?;
                self.expect(Token::Close)
            }
            "LINESTRING" => self.coordinate_list(),
            "POLYGON" | "MULTILINESTRING" => self.list(Self::coordinate_list),
            "MULTIPOLYGON" => self.list(|p| p.list(Self::coordinate_list)),
            "MULTIPOINT" => self.list(Self::multipoint_member),
            "GEOMETRYCOLLECTION" => self.list(Self::geometry),
            other => Err(format!("Unsupported geometry type \"{other}\"")),
        }
    }

    /// `( item, item, ... )` where each item may also be `EMPTY`.
    fn list(&mut self, mut item: impl FnMut(&mut Self) -> Result<(), String>) -> Result<(), String> {
        self.expect(Token::Open)?;
        loop {
            if matches!(self.peek(), Some(Token::Word(w)) if w == "EMPTY") {
                self.pos += 1;
            } else {
                item(self)?;
            }
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::Close) => return Ok(()),
                Some(t) => return Err(format!("Expected ',' or ')', found {t:?}")),
                None => return Err("Unclosed '(' in geometry".to_string()),
            }
        }
    }

    fn coordinate_list(&mut self) -> Result<(), String> {
        self.list(Self::coordinate)
    }

    fn multipoint_member(&mut self) -> Result<(), String> {
        if self.peek() == Some(&Token::Open) {
            self.pos += 1;
            self.coordinate()?;
            self.expect(Token::Close)
        } else {
            self.coordinate()
        }
    }

    fn coordinate(&mut self) -> Result<(), String> {
        let mut ordinates = Vec::with_capacity(4);
        while let Some(Token::Number(n)) = self.peek() {
            ordinates.push(*n);
            self.pos += 1;
        }
        if !(2..=4).contains(&ordinates.len()) {
            return Err(format!(
                "A coordinate needs 2 to 4 ordinates, found {}",
                ordinates.len()
            ));
        }
        self.bounds.include(ordinates[0], ordinates[1]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn b(xmin: f64, xmax: f64, ymin: f64, ymax: f64) -> Bounds {
        Bounds {
            xmin: Some(xmin),
            xmax: Some(xmax),
            ymin: Some(ymin),
            ymax: Some(ymax),
        }
    }

    #[test]
    fn point() {
        assert_eq!(bounds("POINT (30 10)").unwrap(), b(30.0, 30.0, 10.0, 10.0));
    }

    #[test]
    fn blank_is_empty() {
        assert_eq!(bounds("").unwrap(), Bounds::default());
        assert_eq!(bounds("   ").unwrap(), Bounds::default());
        assert!(bounds("").unwrap().is_empty());
    }

    #[test]
    fn empty_keyword() {
        assert!(bounds("POINT EMPTY").unwrap().is_empty());
        assert!(bounds("GEOMETRYCOLLECTION EMPTY").unwrap().is_empty());
    }

    #[test]
    fn linestring_and_polygon() {
        assert_eq!(
            bounds("LINESTRING (30 10, 10 30, 40 40)").unwrap(),
            b(10.0, 40.0, 10.0, 40.0)
        );
        assert_eq!(
            bounds("POLYGON ((35 10, 45 45, 15 40, 10 20, 35 10), (20 30, 35 35, 30 20, 20 30))")
                .unwrap(),
            b(10.0, 45.0, 10.0, 45.0)
        );
    }

    #[test]
    fn multipolygon_spans_all_pairs() {
        let wkt = "MULTIPOLYGON (((40 40, 20 45, 45 30, 40 40)), \
                   ((20 35, 10 30, 10 10, 30 5, 45 20, 20 35), (30 20, 20 15, 20 25, 30 20)))";
        assert_eq!(bounds(wkt).unwrap(), b(10.0, 45.0, 5.0, 45.0));
    }

    #[test]
    fn multipoint_both_syntaxes() {
        assert_eq!(
            bounds("MULTIPOINT ((10 40), (40 30), (20 20), (30 10))").unwrap(),
            b(10.0, 40.0, 10.0, 40.0)
        );
        assert_eq!(
            bounds("MULTIPOINT (10 40, 40 30, 20 20, 30 10)").unwrap(),
            b(10.0, 40.0, 10.0, 40.0)
        );
    }

    #[test]
    fn negative_exponent_and_z_coordinates() {
        assert_eq!(
            bounds("POINT Z (-1.5e2 2.5 100)").unwrap(),
            b(-150.0, -150.0, 2.5, 2.5)
        );
    }

    #[test]
    fn srid_prefix_and_collection() {
        let wkt = "SRID=4326;GEOMETRYCOLLECTION (POINT (4 6), LINESTRING (4 6, 7 10))";
        assert_eq!(bounds(wkt).unwrap(), b(4.0, 7.0, 6.0, 10.0));
    }

    #[test]
    fn lowercase_is_accepted() {
        assert_eq!(bounds("point (1 2)").unwrap(), b(1.0, 1.0, 2.0, 2.0));
    }

    #[test]
    fn garbage_is_a_geometry_validation_error() {
        for wkt in ["not a geometry", "POINT (1)", "POINT (1 2", "CIRCLE (1 2)", "POINT (1 2) x"] {
            let err = bounds(wkt).unwrap_err();
            assert_matches!(err, CoreError::Validation(ref e) if e.for_field("geometry").count() == 1);
        }
    }
}
