use serde::{Deserialize, Serialize};
use std::fmt;

/// Straight (non-premultiplied) 8-bit RGBA.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self::new(r, g, b, 255)
    }

    pub fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    /// Parses `#rrggbb` or `#rrggbbaa` (the `#` is optional).
    pub fn parse_hex(s: &str) -> Result<Self, String> {
        let hex = s.trim().trim_start_matches('#');
        if !(hex.len() == 6 || hex.len() == 8) || !hex.is_ascii() {
            return Err(format!("color '{s}' must be #rrggbb or #rrggbbaa"));
        }
        let byte = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| format!("color '{s}' is not hex"))
        };
        let a = if hex.len() == 8 { byte(6)? } else { 255 };
        Ok(Self::new(byte(0)?, byte(2)?, byte(4)?, a))
    }

    pub fn lerp(self, other: Self, t: f32) -> Self {
        let t = t.clamp(0.0, 1.0);
        let mix = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * t).round() as u8;
        Self::new(
            mix(self.r, other.r),
            mix(self.g, other.g),
            mix(self.b, other.b),
            mix(self.a, other.a),
        )
    }
}

impl TryFrom<String> for Rgba {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse_hex(&value)
    }
}

impl From<Rgba> for String {
    fn from(c: Rgba) -> Self {
        c.to_string()
    }
}

impl fmt::Display for Rgba {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.a == 255 {
            write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            write!(f, "#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }
}

/// Samples evenly spaced color stops at `t` in [0, 1].
pub fn sample_gradient(stops: &[Rgba], t: f32) -> Option<Rgba> {
    match stops {
        [] => None,
        [only] => Some(*only),
        _ => {
            let scaled = t.clamp(0.0, 1.0) * (stops.len() - 1) as f32;
            let lo = (scaled.floor() as usize).min(stops.len() - 2);
            Some(stops[lo].lerp(stops[lo + 1], scaled - lo as f32))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rgb_and_rgba_hex() {
        assert_eq!(Rgba::parse_hex("#ff8000").unwrap(), Rgba::rgb(255, 128, 0));
        assert_eq!(Rgba::parse_hex("10203040").unwrap(), Rgba::new(16, 32, 48, 64));
        assert!(Rgba::parse_hex("#fff").is_err());
        assert!(Rgba::parse_hex("#gggggg").is_err());
    }

    #[test]
    fn display_round_trips_through_parse() {
        let c = Rgba::new(1, 2, 3, 4);
        assert_eq!(Rgba::parse_hex(&c.to_string()).unwrap(), c);
        assert_eq!(Rgba::rgb(255, 0, 0).to_string(), "#ff0000");
    }

    #[test]
    fn gradient_hits_stops_at_ends_and_middle() {
        let stops = [Rgba::rgb(0, 0, 0), Rgba::rgb(200, 0, 0), Rgba::rgb(200, 200, 0)];
        assert_eq!(sample_gradient(&stops, 0.0), Some(stops[0]));
        assert_eq!(sample_gradient(&stops, 0.5), Some(stops[1]));
        assert_eq!(sample_gradient(&stops, 1.0), Some(stops[2]));
        assert_eq!(sample_gradient(&stops, 0.25), Some(Rgba::rgb(100, 0, 0)));
        assert_eq!(sample_gradient(&[], 0.5), None);
    }
}
