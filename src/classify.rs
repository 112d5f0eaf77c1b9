use std::fmt;

use embedded_graphics::pixelcolor::Rgb565;
use embedded_graphics::prelude::WebColors;

/// EPA-style air quality band for a particulate mass concentration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AirQualityBand {
    Good,
    Moderate,
    UnhealthySensitive,
    Unhealthy,
    VeryUnhealthy,
    Hazardous,
}

impl fmt::Display for AirQualityBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AirQualityBand::Good => "good",
            AirQualityBand::Moderate => "moderate",
            AirQualityBand::UnhealthySensitive => "usg",
            AirQualityBand::Unhealthy => "unhealthy",
            AirQualityBand::VeryUnhealthy => "very unhealthy",
            AirQualityBand::Hazardous => "hazardous",
        };
        f.write_str(label)
    }
}

/// Classifies a PM2.5/PM10 mass concentration into a qualitative band.
///
/// Returns `None` at or above 500 ug/m3; callers treat that as "no
/// classification", not an error.
pub fn pm_band(value: u16) -> Option<AirQualityBand> {
    if value < 51 {
        Some(AirQualityBand::Good)
    } else if value < 101 {
        Some(AirQualityBand::Moderate)
    } else if value < 151 {
        Some(AirQualityBand::UnhealthySensitive)
    } else if value < 201 {
        Some(AirQualityBand::Unhealthy)
    } else if value < 300 {
        Some(AirQualityBand::VeryUnhealthy)
    } else if value < 500 {
        Some(AirQualityBand::Hazardous)
    } else {
        None
    }
}

/// Maps PM1.0/PM2.5/PM10 mass concentrations to a display background color.
///
/// The ladder is evaluated top to bottom with the last matching rule
/// winning, so the most severe threshold crossed decides the color. The
/// thresholds are display-specific and intentionally distinct from the
/// `pm_band` boundaries.
pub fn pm_color(_pm10: u16, pm25: u16, pm100: u16) -> Rgb565 {
    let (pm25, pm100) = (pm25 as f32, pm100 as f32);
    let mut color = Rgb565::CSS_GREEN;
    if pm25 > 2.0 || pm100 > 2.0 {
        color = Rgb565::CSS_OLIVE;
    }
    if pm25 > 12.0 || pm100 > 55.0 {
        color = Rgb565::CSS_YELLOW;
    }
    if pm25 > 35.4 || pm100 > 155.0 {
        color = Rgb565::CSS_ORANGE;
    }
    if pm25 > 55.4 || pm100 > 254.0 {
        color = Rgb565::CSS_RED;
    }
    if pm25 > 150.0 || pm100 > 355.0 {
        color = Rgb565::CSS_PURPLE;
    }
    if pm25 > 250.0 || pm100 > 425.0 {
        color = Rgb565::CSS_MAGENTA;
    }
    color
}

pub fn celsius_to_fahrenheit(celsius: f32) -> f32 {
    celsius * 1.8 + 32.0
}
