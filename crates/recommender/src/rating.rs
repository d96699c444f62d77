//! Rating to confidence weight transform

/// Logistic slope applied around the neutral rating
const SLOPE: f32 = 0.5;
/// Rating that maps to a weight of exactly 0.5
const NEUTRAL_RATING: f32 = 3.0;

/// Convert a raw rating to a confidence-like weight in (0, 1).
///
/// rating=1 => ~0.27, rating=3 => 0.5, rating=5 => ~0.73.
/// Inputs are not validated; range checks belong to the request layer.
pub fn confidence_weight(rating: f32) -> f32 {
    1.0 / (1.0 + (-SLOPE * (rating - NEUTRAL_RATING)).exp())
}
