//! Band arithmetic: the half-band rounding rule and raw-score conversion tables.

/// Lowest and highest bands on the scale.
pub const MIN_BAND: f64 = 0.0;
pub const MAX_BAND: f64 = 9.0;

/// Number of questions the published conversion tables are calibrated for.
pub const STANDARD_QUESTION_COUNT: u32 = 40;

/// Round a raw band to the reporting scale.
///
/// The value is first rounded to the nearest quarter band. A quarter remainder
/// of `.25` then rounds up to the next half band and `.75` up to the next whole
/// band; `.0` and `.5` are kept. The result is clamped to `0.0..=9.0`.
///
/// ```
/// use bandscore_core::band::round_band;
/// assert_eq!(round_band(6.25), 6.5);
/// assert_eq!(round_band(6.75), 7.0);
/// ```
pub fn round_band(raw: f64) -> f64 {
    if !raw.is_finite() {
        return MIN_BAND;
    }
    let clamped = raw.clamp(MIN_BAND, MAX_BAND);
    let quarters = (clamped * 4.0).round() as i64;
    let rounded_quarters = match quarters % 4 {
        1 | 3 => quarters + 1,
        _ => quarters,
    };
    (rounded_quarters as f64 / 4.0).min(MAX_BAND)
}

/// Rounded arithmetic mean of a set of bands, or `None` if there are none.
pub fn mean_band(bands: &[f64]) -> Option<f64> {
    if bands.is_empty() {
        return None;
    }
    let sum: f64 = bands.iter().sum();
    Some(round_band(sum / bands.len() as f64))
}

/// Maps a raw correct-answer count out of 40 to a band.
#[derive(Debug, Clone, Copy)]
pub struct ConversionTable {
    /// `(minimum correct, band)` rows, sorted by descending minimum.
    rows: &'static [(u32, f64)],
}

/// Listening conversion.
pub const LISTENING: ConversionTable = ConversionTable {
    rows: &[
        (39, 9.0),
        (37, 8.5),
        (35, 8.0),
        (32, 7.5),
        (30, 7.0),
        (26, 6.5),
        (23, 6.0),
        (18, 5.5),
        (16, 5.0),
        (13, 4.5),
        (10, 4.0),
        (8, 3.5),
        (6, 3.0),
        (4, 2.5),
        (3, 2.0),
        (2, 1.5),
        (1, 1.0),
        (0, 0.0),
    ],
};

/// Academic reading conversion.
pub const ACADEMIC_READING: ConversionTable = ConversionTable {
    rows: &[
        (39, 9.0),
        (37, 8.5),
        (35, 8.0),
        (33, 7.5),
        (30, 7.0),
        (27, 6.5),
        (23, 6.0),
        (19, 5.5),
        (15, 5.0),
        (13, 4.5),
        (10, 4.0),
        (8, 3.5),
        (6, 3.0),
        (4, 2.5),
        (3, 2.0),
        (2, 1.5),
        (1, 1.0),
        (0, 0.0),
    ],
};

impl ConversionTable {
    /// Band for `correct` answers out of 40.
    pub fn band_for(&self, correct: u32) -> f64 {
        self.rows
            .iter()
            .find(|(min, _)| correct >= *min)
            .map(|(_, band)| *band)
            .unwrap_or(MIN_BAND)
    }

    /// Band for `correct` answers out of `total`, scaling shorter practice
    /// sets to the 40-question equivalent first.
    pub fn band_for_scaled(&self, correct: u32, total: u32) -> f64 {
        self.band_for(scale_to_standard(correct, total))
    }
}

/// Scale a raw count to its 40-question equivalent, rounding half up.
pub fn scale_to_standard(correct: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    let correct = correct.min(total);
    if total == STANDARD_QUESTION_COUNT {
        return correct;
    }
    let scaled = correct as f64 * STANDARD_QUESTION_COUNT as f64 / total as f64;
    (scaled.round() as u32).min(STANDARD_QUESTION_COUNT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding_law() {
        assert_eq!(round_band(6.0), 6.0);
        assert_eq!(round_band(6.25), 6.5);
        assert_eq!(round_band(6.5), 6.5);
        assert_eq!(round_band(6.75), 7.0);
    }

    #[test]
    fn rounding_goes_through_nearest_quarter_first() {
        assert_eq!(round_band(6.1), 6.0);
        assert_eq!(round_band(6.2), 6.5);
        assert_eq!(round_band(6.6), 6.5);
        assert_eq!(round_band(6.7), 7.0);
        assert_eq!(round_band(6.9), 7.0);
        // (6.0 + 6.5 + 6.5 + 7.0) / 4 = 6.5
        assert_eq!(round_band(6.5), 6.5);
        // (6.0 + 6.0 + 6.5 + 6.5) / 4 = 6.25
        assert_eq!(round_band(25.0 / 4.0), 6.5);
    }

    #[test]
    fn rounding_clamps_and_handles_nan() {
        assert_eq!(round_band(-1.0), 0.0);
        assert_eq!(round_band(9.75), 9.0);
        assert_eq!(round_band(8.8), 9.0);
        assert_eq!(round_band(f64::NAN), 0.0);
    }

    #[test]
    fn mean_band_rounds() {
        assert_eq!(mean_band(&[7.0, 6.5, 6.0]), Some(6.5));
        assert_eq!(mean_band(&[8.0, 7.5, 7.0, 7.5]), Some(7.5));
        assert_eq!(mean_band(&[6.5, 6.5, 6.0, 6.0]), Some(6.5));
        assert_eq!(mean_band(&[]), None);
    }

    #[test]
    fn conversion_tables_are_monotone() {
        for table in [LISTENING, ACADEMIC_READING] {
            let mut previous = table.band_for(0);
            for correct in 1..=STANDARD_QUESTION_COUNT {
                let band = table.band_for(correct);
                assert!(
                    band >= previous,
                    "band dropped from {previous} to {band} at {correct} correct"
                );
                previous = band;
            }
            assert_eq!(table.band_for(40), 9.0);
            assert_eq!(table.band_for(0), 0.0);
        }
    }

    #[test]
    fn known_conversion_points() {
        assert_eq!(LISTENING.band_for(30), 7.0);
        assert_eq!(LISTENING.band_for(25), 6.0);
        assert_eq!(ACADEMIC_READING.band_for(33), 7.5);
        assert_eq!(ACADEMIC_READING.band_for(16), 5.0);
    }

    #[test]
    fn scaling_short_practice_sets() {
        assert_eq!(scale_to_standard(10, 10), 40);
        assert_eq!(scale_to_standard(5, 10), 20);
        assert_eq!(scale_to_standard(0, 0), 0);
        assert_eq!(scale_to_standard(12, 10), 40);
        assert_eq!(LISTENING.band_for_scaled(15, 20), 7.0);
    }
}
