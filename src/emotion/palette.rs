//! Emotion palette and color blending

use super::{ColorSet, EmotionMap, Rgb};

/// A palette entry in HSL (degrees, percent, percent)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hsl {
    pub h: f64,
    pub s: f64,
    pub l: f64,
}

const fn hsl(h: f64, s: f64, l: f64) -> Hsl {
    Hsl { h, s, l }
}

/// Hue of every blendable emotion. `neutral` is deliberately absent.
const PALETTE: &[(&str, Hsl)] = &[
    ("angry", hsl(4.0, 90.0, 50.0)),
    ("excited", hsl(22.0, 95.0, 54.0)),
    ("happy", hsl(52.0, 95.0, 58.0)),
    ("playful", hsl(95.0, 85.0, 52.0)),
    ("caring", hsl(145.0, 70.0, 48.0)),
    ("confused", hsl(182.0, 72.0, 46.0)),
    ("tired", hsl(210.0, 22.0, 60.0)),
    ("sad", hsl(220.0, 78.0, 54.0)),
    ("serious", hsl(235.0, 58.0, 44.0)),
    ("anxious", hsl(275.0, 70.0, 52.0)),
    ("shy", hsl(305.0, 62.0, 60.0)),
    ("embarrassed", hsl(332.0, 86.0, 58.0)),
    ("surprised", hsl(345.0, 88.0, 56.0)),
    ("affectionate", hsl(350.0, 90.0, 58.0)),
    ("bored", hsl(40.0, 18.0, 62.0)),
];

/// Below this resultant length the circular mean has no meaningful direction
const DEGENERATE_RESULTANT: f64 = 1e-9;

/// Canonical palette name for a raw label
fn canonical(label: &str) -> String {
    let label = label.trim().to_lowercase();
    match label.as_str() {
        "mad" => "angry".to_string(),
        "nervous" => "anxious".to_string(),
        _ => label,
    }
}

/// Palette entry for a label, after aliasing
pub fn lookup(label: &str) -> Option<Hsl> {
    let name = canonical(label);
    PALETTE
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, color)| *color)
}

/// Blend weight for an intensity label
pub fn intensity_weight(label: &str) -> Option<f64> {
    match label.trim().to_lowercase().as_str() {
        "low" => Some(0.3),
        "medium" => Some(0.6),
        "high" => Some(0.9),
        "extreme" => Some(1.2),
        _ => None,
    }
}

/// Blend an emotion annotation into a single color.
///
/// Returns `None` when nothing in the map carries weight: empty map,
/// only `neutral`, or only unknown labels.
pub fn compute_theme(emotion_map: &EmotionMap) -> Option<ColorSet> {
    let weighted: Vec<(Hsl, f64)> = emotion_map
        .iter()
        .filter_map(|(emotion, intensity)| {
            let color = lookup(emotion)?;
            let weight = intensity_weight(intensity)?;
            Some((color, weight))
        })
        .collect();

    let total: f64 = weighted.iter().map(|(_, w)| w).sum();
    if weighted.is_empty() || total <= 0.0 {
        return None;
    }

    let (sin_sum, cos_sum) = weighted.iter().fold((0.0_f64, 0.0_f64), |(s, c), (color, w)| {
        let rad = color.h.to_radians();
        (s + w * rad.sin(), c + w * rad.cos())
    });

    let hue = if sin_sum.hypot(cos_sum) < DEGENERATE_RESULTANT {
        // Opposite hues cancel out; the heaviest entry decides
        weighted
            .iter()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map_or(0.0, |(color, _)| color.h)
    } else {
        sin_sum.atan2(cos_sum).to_degrees().rem_euclid(360.0)
    };

    let saturation = weighted.iter().map(|(c, w)| c.s * w).sum::<f64>() / total;
    let lightness = weighted.iter().map(|(c, w)| c.l * w).sum::<f64>() / total;

    Some(ColorSet::from_rgb(hsl_to_rgb(hsl(hue, saturation, lightness))))
}

/// Standard HSL to RGB conversion, channels rounded to the nearest integer
pub fn hsl_to_rgb(color: Hsl) -> Rgb {
    let h = color.h.rem_euclid(360.0);
    let s = (color.s / 100.0).clamp(0.0, 1.0);
    let l = (color.l / 100.0).clamp(0.0, 1.0);

    let chroma = (1.0 - (2.0 * l - 1.0).abs()) * s;
    let sector = h / 60.0;
    let x = chroma * (1.0 - (sector.rem_euclid(2.0) - 1.0).abs());
    let m = l - chroma / 2.0;

    let (r, g, b) = if sector < 1.0 {
        (chroma, x, 0.0)
    } else if sector < 2.0 {
        (x, chroma, 0.0)
    } else if sector < 3.0 {
        (0.0, chroma, x)
    } else if sector < 4.0 {
        (0.0, x, chroma)
    } else if sector < 5.0 {
        (x, 0.0, chroma)
    } else {
        (chroma, 0.0, x)
    };

    Rgb {
        r: to_channel(r + m),
        g: to_channel(g + m),
        b: to_channel(b + m),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // clamped to 0..=255 first
fn to_channel(unit: f64) -> u8 {
    (unit * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Hue of a color, in degrees, for inspection in tests
#[cfg(test)]
pub fn rgb_hue(rgb: Rgb) -> f64 {
    let r = f64::from(rgb.r) / 255.0;
    let g = f64::from(rgb.g) / 255.0;
    let b = f64::from(rgb.b) / 255.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    if delta <= 0.0 {
        return 0.0;
    }
    let hue = if (max - r).abs() < f64::EPSILON {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if (max - g).abs() < f64::EPSILON {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    hue.rem_euclid(360.0)
}
