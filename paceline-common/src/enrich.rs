//! Training-load enrichment metrics
//!
//! Approximate charge (training stress) and intensity scores computed from
//! heart rate, moving time, and speed. These are deliberately rough: they
//! exist so the assistant can compare sessions, not to replace a power meter.

/// Estimated max heart rate used by the charge formula (220 - age 35).
const ESTIMATED_MAX_HR: f64 = 185.0;

/// Adjustment factor applied to the raw charge value.
const CHARGE_FACTOR: f64 = 1.2;

/// Approximate training charge from average HR and moving time.
///
/// `(avg_hr / estimated_max_hr) * minutes_moving * 1.2`, rounded to two
/// decimals. None when heart rate or moving time is missing.
pub fn charge(avg_hr: Option<f64>, time_moving_s: i64) -> Option<f64> {
    let hr = avg_hr?;
    if time_moving_s <= 0 {
        return None;
    }
    let hr_intensity = hr / ESTIMATED_MAX_HR;
    let duration_minutes = time_moving_s as f64 / 60.0;
    Some(round_to(hr_intensity * duration_minutes * CHARGE_FACTOR, 2))
}

/// Intensity score from the HR/speed ratio.
///
/// `avg_hr * avg_speed / 100`, rounded to three decimals; speed defaults to
/// 1 m/s when the source did not report it. None without heart rate.
pub fn intensity(avg_hr: Option<f64>, avg_speed: Option<f64>) -> Option<f64> {
    let hr = avg_hr?;
    let speed = avg_speed.unwrap_or(1.0);
    Some(round_to(hr * speed / 100.0, 3))
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}
