//! Identity colors.

use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// An RGB triple, rendered as `#rrggbb`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    #[must_use]
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Color { r, g, b }
    }

    /// Parses `#rrggbb` (case-insensitive, `#` optional).
    pub fn parse_hex(s: &str) -> Result<Color, ParseColorError> {
        let hex = s.strip_prefix('#').unwrap_or(s);
        if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ParseColorError);
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| ParseColorError);
        Ok(Color {
            r: channel(0)?,
            g: channel(2)?,
            b: channel(4)?,
        })
    }

    #[must_use]
    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Color").field(&self.to_hex()).finish()
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ColorVisitor;

        impl de::Visitor<'_> for ColorVisitor {
            type Value = Color;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a #rrggbb color string")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Color::parse_hex(v).map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_str(ColorVisitor)
    }
}

/// The error type returned when a hex color string is malformed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("color must be a 6-digit hex string like #2e86de")]
pub struct ParseColorError;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let c = Color::rgb(0x2e, 0x86, 0xde);
        assert_eq!(c.to_hex(), "#2e86de");
        assert_eq!(Color::parse_hex("#2e86de"), Ok(c));
        assert_eq!(Color::parse_hex("2E86DE"), Ok(c));
    }

    #[test]
    fn malformed_hex_is_rejected() {
        assert!(Color::parse_hex("#2e86d").is_err());
        assert!(Color::parse_hex("#2e86dg").is_err());
        assert!(Color::parse_hex("").is_err());
    }

    #[test]
    fn serde_uses_hex_form() {
        let c = Color::rgb(255, 0, 16);
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(json, "\"#ff0010\"");
        assert_eq!(serde_json::from_str::<Color>(&json).unwrap(), c);
    }

    quickcheck::quickcheck! {
        fn hex_round_trips(r: u8, g: u8, b: u8) -> bool {
            let c = Color::rgb(r, g, b);
            Color::parse_hex(&c.to_hex()) == Ok(c)
        }
    }
}
