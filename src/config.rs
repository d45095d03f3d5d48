//! Node configuration parameters
//!
//! All tunable parameters for one control node.
//! Loaded from a JSON file through [`ConfigPort`](crate::app::ports::ConfigPort);
//! every field has a default matching the installed hardware.

use std::path::PathBuf;

use chrono::NaiveTime;
use heapless::Vec as FixedVec;
use serde::{Deserialize, Serialize};

/// Maximum number of calibrated levels on one probe.
pub const MAX_PROBE_LEVELS: usize = 16;

/// Which control policy this node runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Six-state transfer between two butts groups through one valve.
    Transfer,
    /// Daily mains-water top-up with manual override.
    TopUp,
    /// Gate valve station following arbitrated position requests.
    ValveStation,
}

/// Core node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    // --- Identity ---
    /// Zone id this node acts as when requesting control.
    pub site_id: String,
    pub policy: PolicyKind,

    // --- Remote calls ---
    /// Attempts per collaborator call before it is reported failed.
    pub remote_retries: u8,
    /// Pause between attempts (milliseconds).
    pub remote_retry_pause_ms: u64,

    // --- Background loops ---
    /// Servo poll period while holding position (milliseconds).
    pub servo_hold_period_ms: u64,
    /// Servo poll period while the motor is driving (milliseconds).
    pub servo_drive_period_ms: u64,
    /// Level decoder poll period (milliseconds).
    pub decoder_period_ms: u64,

    // --- Devices ---
    pub valve: ValveGeometry,
    /// ADC channel carrying the valve position potentiometer.  Must not be
    /// one of `probe_channels`.
    pub valve_position_channel: u8,
    pub probe: ProbeCalibration,
    /// ADC channels wired to the four probe chains, in column order.
    pub probe_channels: [u8; 4],
    /// Reading id the decoded probe depth is published under.
    pub probe_reading_id: String,

    // --- Policies ---
    pub transfer: TransferLevels,
    pub topup: TopUpSchedule,
    /// File holding the manual override word for the top-up solenoid.
    pub override_file: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            site_id: "G6".into(),
            policy: PolicyKind::Transfer,

            remote_retries: 3,
            remote_retry_pause_ms: 500,

            servo_hold_period_ms: 1000,
            servo_drive_period_ms: 200,
            decoder_period_ms: 500, // 2 Hz

            valve: ValveGeometry::default(),
            valve_position_channel: 4,
            probe: ProbeCalibration::default(),
            probe_channels: [0, 1, 2, 3],
            probe_reading_id: "SUMP:M0".into(),

            transfer: TransferLevels::default(),
            topup: TopUpSchedule::default(),
            override_file: PathBuf::from("overrides/device/S0"),
        }
    }
}

// ---------------------------------------------------------------------------
// Gate valve geometry
// ---------------------------------------------------------------------------

/// Fixed mechanical limits of one motorised gate valve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValveGeometry {
    /// Highest position (%) the valve may be driven to.
    pub max_open: u8,
    /// Lowest position (%) the valve may be driven to.
    pub min_open: u8,
    /// Half-width of the acceptance band (%).
    pub tolerance: u8,
    /// Potentiometer voltage at 100 % open.
    pub ref_voltage: f32,
}

impl Default for ValveGeometry {
    fn default() -> Self {
        Self {
            max_open: 99,
            min_open: 1,
            tolerance: 5,
            ref_voltage: 3.3,
        }
    }
}

// ---------------------------------------------------------------------------
// Level probe calibration
// ---------------------------------------------------------------------------

/// Inclusive compensated-voltage window identifying one level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelWindow {
    pub low: f32,
    pub high: f32,
}

impl LevelWindow {
    pub fn contains(&self, volts: f32) -> bool {
        volts >= self.low && volts <= self.high
    }
}

/// Per-level voltage windows plus the depth each level means on each chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeCalibration {
    pub windows: FixedVec<LevelWindow, MAX_PROBE_LEVELS>,
    /// `depths[column][level]` in millimetres.
    pub depths: [FixedVec<i32, MAX_PROBE_LEVELS>; 4],
    /// Dip voltage at or above which the magnet sits between two sensing zones.
    pub shortcut_volts: f32,
}

impl ProbeCalibration {
    pub fn levels(&self) -> usize {
        self.windows.len()
    }

    /// Tables must agree in length and windows must not be inverted.
    pub fn is_consistent(&self) -> bool {
        !self.windows.is_empty()
            && self.depths.iter().all(|col| col.len() == self.windows.len())
            && self.windows.iter().all(|w| w.low <= w.high)
    }
}

impl Default for ProbeCalibration {
    /// Calibration of the sump probe (SUMP:M0).
    fn default() -> Self {
        const HIGH: [f32; 10] = [0.07, 0.17, 0.35, 0.56, 0.73, 0.92, 1.22, 1.54, 2.1, 2.45];
        const LOW: [f32; 10] = [0.05, 0.15, 0.33, 0.53, 0.7, 0.88, 1.18, 1.5, 2.0, 2.4];

        const _: () = assert!(HIGH.len() <= MAX_PROBE_LEVELS);

        let windows = LOW
            .iter()
            .zip(HIGH.iter())
            .map(|(&low, &high)| LevelWindow { low, high })
            .collect::<FixedVec<LevelWindow, MAX_PROBE_LEVELS>>();

        // Chains are offset by 25 mm: 100s, 25s, 50s, 75s.
        let column = |offset: i32| {
            (0..10)
                .map(|i| i * 100 + offset)
                .collect::<FixedVec<i32, MAX_PROBE_LEVELS>>()
        };

        Self {
            windows,
            depths: [column(0), column(25), column(50), column(75)],
            shortcut_volts: 3.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Policy parameters
// ---------------------------------------------------------------------------

/// Inclusive lower bounds (mm) of the named levels used by the transfer policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLevels {
    pub source_full: i32,
    pub source_not_empty: i32,
    pub dest_overfull: i32,
    pub dest_full: i32,
    pub dest_very_nearly_full: i32,
    pub dest_nearly_full: i32,
}

impl Default for TransferLevels {
    fn default() -> Self {
        Self {
            source_full: 975,
            source_not_empty: 25,
            dest_overfull: 975,
            dest_full: 900,
            dest_very_nearly_full: 800,
            dest_nearly_full: 700,
        }
    }
}

/// Daily top-up window and thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopUpSchedule {
    /// A top-up may only begin inside `[window_start, window_end]`.
    pub window_start: NaiveTime,
    pub window_end: NaiveTime,
    /// Last-resort cut-off should the level sensors fail.
    pub failsafe_end: NaiveTime,
    /// Top-up begins below this level (mm).
    pub start_level: i32,
    /// Top-up ends at or above this level (mm).
    pub stop_level: i32,
}

impl Default for TopUpSchedule {
    fn default() -> Self {
        Self {
            window_start: NaiveTime::from_hms_opt(14, 0, 0).unwrap_or(NaiveTime::MIN),
            window_end: NaiveTime::from_hms_opt(14, 2, 0).unwrap_or(NaiveTime::MIN),
            failsafe_end: NaiveTime::from_hms_opt(15, 0, 0).unwrap_or(NaiveTime::MIN),
            start_level: 500,
            stop_level: 500,
        }
    }
}
