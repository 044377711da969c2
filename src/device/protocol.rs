//! Light gun wire protocol
//!
//! Devices send two kinds of text frames: status packets
//! (`VERSION:<ver>;WIFI:<ssid>:<pass>;AP:<ssid>:<pass>;OLED:<w>,<h>;`) and
//! color packets (`<r>,<g>,<b>,<shotFlag>`). Binary frames carry the same
//! telemetry text the host pushes and only acknowledge it.

use std::fmt;

/// Prefix that marks a status packet
pub const STATUS_PREFIX: &str = "VERSION";

/// Raw photodiode intensities from one color packet.
///
/// Fields that failed to parse are NaN.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSample {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

impl RawSample {
    /// Every channel parsed to a finite number
    pub fn is_finite(&self) -> bool {
        self.r.is_finite() && self.g.is_finite() && self.b.is_finite()
    }
}

/// Decoded color packet
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorPacket {
    pub sample: RawSample,
    /// Trigger was pulled for this reading
    pub shot: bool,
}

impl ColorPacket {
    pub fn parse(text: &str) -> Self {
        let mut fields = text.split(',');
        let r = parse_field(fields.next());
        let g = parse_field(fields.next());
        let b = parse_field(fields.next());
        let flag = parse_field(fields.next());

        Self {
            sample: RawSample { r, g, b },
            shot: !flag.is_nan() && flag != 0.0,
        }
    }
}

/// Numeric field: blank is zero, missing or garbage is NaN.
fn parse_field(field: Option<&str>) -> f64 {
    match field.map(str::trim) {
        Some("") => 0.0,
        Some(raw) => raw.parse().unwrap_or(f64::NAN),
        None => f64::NAN,
    }
}

/// SSID/password pair
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub ssid: String,
    pub pass: String,
}

impl Credentials {
    fn parse(value: &str) -> Self {
        let (ssid, pass) = value.split_once(':').unwrap_or((value, ""));
        Self {
            ssid: ssid.to_string(),
            pass: pass.to_string(),
        }
    }
}

/// Decoded status packet; absent keys stay `None`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusPacket {
    pub version: Option<String>,
    pub wifi: Option<Credentials>,
    pub ap: Option<Credentials>,
    pub oled: Option<(u32, u32)>,
}

impl StatusPacket {
    pub fn parse(text: &str) -> Self {
        let mut packet = Self::default();

        for entry in text.split(';').filter(|e| !e.is_empty()) {
            let (key, value) = entry.split_once(':').unwrap_or((entry, ""));
            match key {
                "VERSION" => packet.version = Some(value.to_string()),
                "WIFI" => packet.wifi = Some(Credentials::parse(value)),
                "AP" => packet.ap = Some(Credentials::parse(value)),
                "OLED" => {
                    packet.oled = value.split_once(',').and_then(|(w, h)| {
                        Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
                    });
                }
                // Unknown keys are ignored
                _ => {}
            }
        }

        packet
    }
}

/// Accuracy/hit/shot line pushed to a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Telemetry {
    pub accuracy: u32,
    pub hits: u32,
    pub shots: u32,
}

impl fmt::Display for Telemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Accuracy: {}%\nH|S: {}|{}",
            self.accuracy, self.hits, self.shots
        )
    }
}

impl Telemetry {
    /// Parse the telemetry text echoed back by a device
    pub fn parse(text: &str) -> Option<Self> {
        let (accuracy_line, counts_line) = text.split_once('\n')?;
        let accuracy = accuracy_line
            .strip_prefix("Accuracy: ")?
            .trim_end()
            .strip_suffix('%')?
            .parse()
            .ok()?;
        let (hits, shots) = counts_line.strip_prefix("H|S: ")?.trim_end().split_once('|')?;

        Some(Self {
            accuracy,
            hits: hits.parse().ok()?,
            shots: shots.parse().ok()?,
        })
    }
}

/// Decoded text frame
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Status(StatusPacket),
    Color(ColorPacket),
}

/// Shape of the last decoded text frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecoderMode {
    /// Nothing decoded on this connection yet
    #[default]
    AwaitingAny,
    StatusMode,
    ColorMode,
}

/// Two-state text frame decoder.
///
/// Every frame first moves the decoder into `StatusMode` (frame carries the
/// status prefix) or `ColorMode` (anything else) and is then decoded in that
/// mode.
#[derive(Debug, Clone, Default)]
pub struct PacketDecoder {
    mode: DecoderMode,
}

impl PacketDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> DecoderMode {
        self.mode
    }

    /// Forget the previous shape (new connection)
    pub fn reset(&mut self) {
        self.mode = DecoderMode::AwaitingAny;
    }

    pub fn decode(&mut self, text: &str) -> Packet {
        self.mode = if text.starts_with(STATUS_PREFIX) {
            DecoderMode::StatusMode
        } else {
            DecoderMode::ColorMode
        };

        match self.mode {
            DecoderMode::StatusMode => Packet::Status(StatusPacket::parse(text)),
            _ => Packet::Color(ColorPacket::parse(text)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_packet_with_trigger() {
        let packet = ColorPacket::parse("300,60,40,1");
        assert_eq!(packet.sample, RawSample { r: 300.0, g: 60.0, b: 40.0 });
        assert!(packet.shot);
    }

    #[test]
    fn color_packet_without_trigger_is_only_a_sample() {
        let packet = ColorPacket::parse("12, 13 ,14,0");
        assert_eq!(packet.sample, RawSample { r: 12.0, g: 13.0, b: 14.0 });
        assert!(!packet.shot);
    }

    #[test]
    fn short_color_packet_degrades_to_nan() {
        let packet = ColorPacket::parse("12,13");
        assert_eq!(packet.sample.r, 12.0);
        assert!(packet.sample.b.is_nan());
        assert!(!packet.shot);

        let garbled = ColorPacket::parse("x,1,2,y");
        assert!(garbled.sample.r.is_nan());
        assert!(!garbled.sample.is_finite());
        assert!(!garbled.shot);
    }

    #[test]
    fn any_non_zero_flag_is_a_trigger() {
        assert!(ColorPacket::parse("1,2,3,inf").shot);
        assert!(ColorPacket::parse("1,2,3,-1").shot);
        assert!(!ColorPacket::parse("1,2,3,0").shot);
        assert!(!ColorPacket::parse("1,2,3,NaN").shot);
    }

    #[test]
    fn status_packet_fields() {
        let packet =
            StatusPacket::parse("VERSION:1.2.0;WIFI:home:secret;AP:gun:quack;OLED:128,64;");
        assert_eq!(packet.version.as_deref(), Some("1.2.0"));
        assert_eq!(
            packet.wifi,
            Some(Credentials { ssid: "home".into(), pass: "secret".into() })
        );
        assert_eq!(packet.ap.as_ref().map(|c| c.ssid.as_str()), Some("gun"));
        assert_eq!(packet.oled, Some((128, 64)));
    }

    #[test]
    fn status_packet_ignores_unknown_keys() {
        let packet = StatusPacket::parse("VERSION:0.1.0;BATTERY:87;;OLED:wide,64");
        assert_eq!(packet.version.as_deref(), Some("0.1.0"));
        assert_eq!(packet.oled, None);
        assert_eq!(packet.wifi, None);
    }

    #[test]
    fn telemetry_text_matches_device_format() {
        let telemetry = Telemetry { accuracy: 67, hits: 2, shots: 3 };
        let text = telemetry.to_string();
        assert_eq!(text, "Accuracy: 67%\nH|S: 2|3");
        assert_eq!(Telemetry::parse(&text), Some(telemetry));
        assert_eq!(Telemetry::parse("Accuracy: 100$\nH|S: 0|0"), None);
    }

    #[test]
    fn decoder_switches_mode_per_frame() {
        let mut decoder = PacketDecoder::new();
        assert_eq!(decoder.mode(), DecoderMode::AwaitingAny);

        assert!(matches!(decoder.decode("VERSION:1.0.0;"), Packet::Status(_)));
        assert_eq!(decoder.mode(), DecoderMode::StatusMode);

        assert!(matches!(decoder.decode("1,2,3,0"), Packet::Color(_)));
        assert_eq!(decoder.mode(), DecoderMode::ColorMode);

        decoder.reset();
        assert_eq!(decoder.mode(), DecoderMode::AwaitingAny);
    }
}
