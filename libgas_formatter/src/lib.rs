//! # gas_formatter
//!
//! gas_formatter turns raw gas-sensor acquisition logs into per-exposure records. The
//! acquisition software writes one wide CSV log per experiment: a time column, one
//! resistance column per relay (or a single current column on the flow rig), and a phase
//! label on every row. gas_formatter splits the log per sensor, cuts each sensor's series
//! into baseline, on (analyte exposure) and off (recovery) windows, attaches the metadata
//! carried by the file name, and writes one record per accepted exposure step.
//!
//! ## Installation
//!
//! The only method of install is from source. If you have not used Rust before, see the
//! [Rust docs](https://www.rust-lang.org/tools/install) for installation instructions.
//!
//! To build and install the CLI use `cargo install --path ./gas_formatter_cli` from the top
//! level repository. To use the CLI see the `gas_formatter_cli` help (`gas_formatter_cli
//! --help`).
//!
//! ## Input
//!
//! Logs are CSV files with a header row. The columns read are:
//!
//! - `Elapsed Time (s)` or `Time`: the time axis, strictly increasing
//! - `Cycle` or `Stage`: the phase label. Labels containing `pre` are baseline, `off` are
//! recovery, `on` are exposure (case-insensitive, checked in that order). Digits in the
//! label give the step, so `On2` and `Off2` belong to the second concentration step.
//! - `Relay N Resistance` for N in 1..=`max_relays`: one column per relay. Constant
//! columns are treated as disconnected. A log with a single `Resistance` column and no
//! relay columns is read as one sensor.
//! - `Current (uA)` and `Flow [A:B:C]`: read instead of the relays on the flow rig.
//!
//! File names carry the metadata. A name such as
//! `20241105_PN1_CuOxSnOx_H2_1250ppm_2500ppm_3750ppm_PN1.2.csv` says the date (the first
//! 8-digit token), the material and analyte (tokens of the configured vocabularies), one
//! concentration per step (`<n>ppm`), the sensor (`PN<n>`, optionally `.<relay>`) and, for
//! repeat logs, the repeat count (`rep=<n>`).
//!
//! ## Configuration
//!
//! Configuration is a YAML file, a template of which the CLI writes with the `new`
//! subcommand. The format is as follows:
//!
//! ```yml
//! input_path: logs
//! relay_data_path: relay_data
//! json_path: json_folder
//! table_path: null
//! repeat_data_path: null
//! analytes: [IPA, Water, EtOH, Ace]
//! materials: [CuOxSnOx]
//! saturation_ppm:
//!   Water: 28483.0
//!   EtOH: 70825.0
//!   Ace: 282973.0
//!   IPA: 52302.0
//! min_exposure_seconds: 10.0
//! require_baseline: false
//! include_baseline: true
//! max_relays: 8
//! discard_relays: []
//! sensor_pattern: PN\d+
//! sensor_label: null
//! mode: cascade
//! repeat_count: null
//! repeat_on_pattern: Run-On Cycle \(Repeat (\d+)\)
//! repeat_off_pattern: Off Cycle \(Repeat (\d+)\)
//! rig: relay_resistance
//! concentration_source: filename
//! empty_selection: marker
//! extract_features: false
//! ```
//!
//! - `input_path`: a single log, or a directory whose `.csv` files are processed in name
//! order
//! - `relay_data_path`, `json_path`, `table_path`, `repeat_data_path`: outputs. A `null`
//! output is not written.
//! - `min_exposure_seconds`: on and off windows (and the baseline, with
//! `require_baseline`) shorter than this drop their step
//! - `mode`: `cascade` for logs of one or more concentration steps, `repeat` for logs that
//! repeat one exposure; repeat logs are split per repeat before segmenting
//! - `concentration_source`: `filename` reads `<n>ppm` tokens, `flow_ratio` averages
//! `saturation_ppm * C / (A + C)` over the on rows
//! - `empty_selection`: a phase without rows is written as `[]` (`marker`) or as `[0.0]`
//! (`zero_placeholder`)
//!
//! ## Output
//!
//! - Per-sensor series (`relay_data_path`): `<log name>_<sensor>.csv` (`<log name>.csv`
//! for a single-sensor log) with columns
//! `Time,Resistance,Cycle`
//! - Records (`json_path`): one JSON file per accepted step named
//! `<date>_<material>_<analyte>_<ppm>ppm_cycle<step>_<sensor>.json`
//! - Record table (`table_path`): a CSV appended to on every run with columns
//! `filename,analyte,ppm,on_cycle,off_cycle`
//! - Repeat sub-logs (`repeat_data_path`): `<date>_<log name>_rep=<n>.csv`
//!
//! Existing files are never overwritten; a taken name gets a `_<n>` suffix. Output
//! directories are locked while a batch runs, and `--clear` empties them only once every
//! lock is held.
pub mod batch_status;
pub mod config;
pub mod error;
pub mod features;
pub mod flow;
pub mod metadata;
pub mod process;
pub mod raw_log;
pub mod record;
pub mod relay;
pub mod repeat_splitter;
pub mod segmenter;
pub mod sink;
