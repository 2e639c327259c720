/// Reference power at one metre when nothing better is known
pub const DEFAULT_REFERENCE_POWER_DBM: f64 = -59.0;

pub const DEFAULT_PATH_LOSS_EXPONENT: f64 = 2.0;

const MIN_EXPONENT: f64 = 1.0;
const MAX_EXPONENT: f64 = 4.0;

const MIN_DISTANCE_M: f64 = 0.1;
const MAX_DISTANCE_M: f64 = 50.0;

/// Estimate distance in metres from signal strength with the log-distance path-loss model
///
/// Returns `None` when `rssi` is missing or not finite. The result is clamped to
/// `[0.1, 50.0]` and rounded to centimetres; beyond that range the model is noise.
pub fn estimate_distance(
    rssi: Option<f64>,
    reference_power: Option<f64>,
    path_loss_exponent: Option<f64>,
) -> Option<f64> {
    let rssi = rssi.filter(|value| value.is_finite())?;

    let reference = reference_power
        .filter(|value| value.is_finite())
        .unwrap_or(DEFAULT_REFERENCE_POWER_DBM);
    let exponent = path_loss_exponent
        .filter(|value| value.is_finite())
        .unwrap_or(DEFAULT_PATH_LOSS_EXPONENT)
        .clamp(MIN_EXPONENT, MAX_EXPONENT);

    let distance = 10f64.powf((reference - rssi) / (10.0 * exponent));
    let clamped = distance.clamp(MIN_DISTANCE_M, MAX_DISTANCE_M);

    Some((clamped * 100.0).round() / 100.0)
}

/// Integer-dBm convenience used on normalized records
pub fn estimate_from_dbm(rssi: Option<i32>, reference_power: Option<i32>, exponent: f64) -> Option<f64> {
    estimate_distance(
        rssi.map(f64::from),
        reference_power.map(f64::from),
        Some(exponent),
    )
}
