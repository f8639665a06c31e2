//! Binary and JSON snapshots of network state.
//!
//! With the `serde` feature, [`HtmConfig`](crate::algorithms::HtmConfig),
//! [`Connections`], [`SpatialPooler`] and the
//! [`HomeostaticPlasticityController`](crate::algorithms::HomeostaticPlasticityController)
//! implement `Serialize` and `Deserialize`, and therefore [`Serializable`].
//! [`NetworkSnapshot`] bundles everything a running network needs, including
//! the random generator position, so a restored network continues exactly
//! where the saved one stopped.
//!
//! # Supported Formats
//!
//! - **Binary** - Fast binary serialization using bincode (default)
//! - **JSON** - Human-readable JSON format using serde_json
//!
//! # Example
//!
//! ```rust
//! # #[cfg(feature = "serde")] {
//! use cortical::prelude::*;
//!
//! let mut config = HtmConfig::new(&[16], &[8]);
//! config.potential_radius = -1;
//! config.stimulus_threshold = 1.0;
//! config.num_active_columns_per_inh_area = 2.0;
//! let mut mem = Connections::new(config).unwrap();
//! let sp = SpatialPooler::init(&mut mem).unwrap();
//!
//! let bytes = NetworkSnapshot::new(mem, sp).to_bytes(SerializableFormat::Binary).unwrap();
//! let (mem, _sp, _tm): (Connections, SpatialPooler, TemporalMemory) =
//!     NetworkSnapshot::from_bytes(&bytes, SerializableFormat::Binary)
//!         .unwrap()
//!         .into_network()
//!         .unwrap();
//! assert_eq!(mem.num_columns(), 8);
//! # }
//! ```

use crate::error::{CorticalError, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

#[cfg(feature = "serde")]
use crate::algorithms::{ActivityExecutor, ColumnExecutor, Connections, Sequential, SpatialPooler, TemporalMemory};
#[cfg(feature = "serde")]
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Serialization format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerializableFormat {
    /// bincode; compact, not portable across crate versions.
    #[default]
    Binary,

    /// Pretty-printed JSON.
    Json,
}

impl SerializableFormat {
    /// Infers the format from a file extension: `.json` is JSON, anything
    /// else is binary.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => SerializableFormat::Json,
            _ => SerializableFormat::Binary,
        }
    }
}

impl std::fmt::Display for SerializableFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SerializableFormat::Binary => write!(f, "BINARY"),
            SerializableFormat::Json => write!(f, "JSON"),
        }
    }
}

impl std::str::FromStr for SerializableFormat {
    type Err = CorticalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "BINARY" | "BIN" => Ok(SerializableFormat::Binary),
            "JSON" => Ok(SerializableFormat::Json),
            _ => Err(CorticalError::InvalidParameter {
                name: "format",
                message: format!("Unknown format '{}'. Expected: BINARY, JSON", s),
            }),
        }
    }
}

#[cfg(feature = "serde")]
fn snapshot_error(format: SerializableFormat, action: &str, error: impl std::fmt::Display) -> CorticalError {
    CorticalError::SerializationError {
        message: format!("{format} {action} failed: {error}"),
    }
}

/// Saving and loading through bincode or serde_json.
#[cfg(feature = "serde")]
pub trait Serializable: Serialize + DeserializeOwned + Sized {
    /// Serializes to a byte vector.
    fn to_bytes(&self, format: SerializableFormat) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.save(&mut bytes, format)?;
        Ok(bytes)
    }

    /// Deserializes from a byte slice.
    fn from_bytes(bytes: &[u8], format: SerializableFormat) -> Result<Self> {
        Self::load(bytes, format)
    }

    /// Serializes to a JSON string.
    fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| snapshot_error(SerializableFormat::Json, "serialization", e))
    }

    /// Deserializes from a JSON string.
    fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| snapshot_error(SerializableFormat::Json, "deserialization", e))
    }

    /// Serializes to a writer.
    fn save<W: Write>(&self, writer: W, format: SerializableFormat) -> Result<()> {
        let mut writer = BufWriter::new(writer);
        match format {
            SerializableFormat::Binary => bincode::serialize_into(&mut writer, self)
                .map_err(|e| snapshot_error(format, "serialization", e))?,
            SerializableFormat::Json => serde_json::to_writer_pretty(&mut writer, self)
                .map_err(|e| snapshot_error(format, "serialization", e))?,
        }
        writer.flush()?;
        Ok(())
    }

    /// Deserializes from a reader.
    fn load<R: Read>(reader: R, format: SerializableFormat) -> Result<Self> {
        let mut reader = BufReader::new(reader);
        match format {
            SerializableFormat::Binary => {
                bincode::deserialize_from(&mut reader).map_err(|e| snapshot_error(format, "deserialization", e))
            }
            SerializableFormat::Json => {
                serde_json::from_reader(&mut reader).map_err(|e| snapshot_error(format, "deserialization", e))
            }
        }
    }

    /// Saves to a file in the format implied by its extension.
    fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let format = SerializableFormat::from_path(path.as_ref());
        self.save(File::create(path.as_ref())?, format)
    }

    /// Loads from a file in the format implied by its extension.
    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let format = SerializableFormat::from_path(path.as_ref());
        Self::load(File::open(path.as_ref())?, format)
    }
}

#[cfg(feature = "serde")]
impl<T> Serializable for T where T: Serialize + DeserializeOwned + Sized {}

/// Everything needed to resume a network: the connections graph and the
/// spatial pooler with its homeostatic controller.
///
/// The temporal memory keeps no state outside [`Connections`] and is rebuilt
/// by [`into_network`](Self::into_network) without touching the cycle state.
/// A restored controller has no callback.
#[cfg(feature = "serde")]
#[derive(Debug, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct NetworkSnapshot<E: ColumnExecutor = Sequential> {
    /// The structural graph and all statistics.
    pub connections: Connections,
    /// The pooler; only its homeostatic controller is stored.
    pub spatial_pooler: SpatialPooler<E>,
}

#[cfg(feature = "serde")]
impl<E: ColumnExecutor + ActivityExecutor> NetworkSnapshot<E> {
    /// Bundles a network for saving.
    pub fn new(connections: Connections, spatial_pooler: SpatialPooler<E>) -> Self {
        Self {
            connections,
            spatial_pooler,
        }
    }

    /// Checks the restored graph and hands back a runnable network.
    ///
    /// # Errors
    ///
    /// Returns `SerializationError` when the graph breaks a structural invariant.
    pub fn into_network(self) -> Result<(Connections, SpatialPooler<E>, TemporalMemory<E>)> {
        self.connections
            .check_invariants()
            .map_err(|e| CorticalError::SerializationError {
                message: format!("snapshot holds an inconsistent graph: {e}"),
            })?;
        Ok((self.connections, self.spatial_pooler, TemporalMemory::default()))
    }
}

#[cfg(all(test, feature = "serde"))]
mod tests {
    use super::*;
    use crate::algorithms::{HomeostaticPlasticityController, HtmConfig};

    fn config() -> HtmConfig {
        let mut config = HtmConfig::new(&[32], &[16]);
        config.potential_radius = -1;
        config.stimulus_threshold = 1.0;
        config.num_active_columns_per_inh_area = 3.0;
        config.cells_per_column = 4;
        config.activation_threshold = 2;
        config.min_threshold = 1;
        config
    }

    fn input(step: usize) -> Vec<u8> {
        (0..32).map(|i| u8::from((i + step) % 4 == 0)).collect()
    }

    fn trained() -> (Connections, SpatialPooler, TemporalMemory) {
        let mut mem = Connections::new(config()).unwrap();
        let mut sp = SpatialPooler::init(&mut mem).unwrap();
        sp.attach_homeostatic_controller(HomeostaticPlasticityController::detached(3));
        let tm = TemporalMemory::init(&mut mem).unwrap();
        for step in 0..6 {
            let active = sp.compute(&mut mem, &input(step), true).unwrap();
            tm.compute(&mut mem, &active, true).unwrap();
        }
        (mem, sp, tm)
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!(
            "BINARY".parse::<SerializableFormat>().unwrap(),
            SerializableFormat::Binary
        );
        assert_eq!(
            "json".parse::<SerializableFormat>().unwrap(),
            SerializableFormat::Json
        );
        assert!("unknown".parse::<SerializableFormat>().is_err());
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(SerializableFormat::from_path(Path::new("net.json")), SerializableFormat::Json);
        assert_eq!(SerializableFormat::from_path(Path::new("net.bin")), SerializableFormat::Binary);
        // case-sensitive
        assert_eq!(SerializableFormat::from_path(Path::new("net.JSON")), SerializableFormat::Binary);
    }

    #[test]
    fn test_config_json_serialization() {
        let mut config = HtmConfig::new(&[10, 10], &[20]);
        config.max_boost = 2.5;

        let json = config.to_json().unwrap();
        assert!(json.contains("input_dimensions"));

        let restored = HtmConfig::from_json(&json).unwrap();
        assert_eq!(restored.input_dimensions, vec![10, 10]);
        assert_eq!(restored.column_dimensions, vec![20]);
        assert_eq!(restored.max_boost, 2.5);
    }

    #[test]
    fn test_snapshot_resumes_network() {
        let (mem, sp, tm) = trained();
        let snapshot = NetworkSnapshot::new(mem, sp);
        let bytes = snapshot.to_bytes(SerializableFormat::Binary).unwrap();
        let NetworkSnapshot { connections: mut mem, spatial_pooler: mut sp } = snapshot;

        let (mut mem2, mut sp2, tm2) = NetworkSnapshot::<Sequential>::from_bytes(&bytes, SerializableFormat::Binary)
            .unwrap()
            .into_network()
            .unwrap();
        assert_eq!(sp.homeostatic_controller(), sp2.homeostatic_controller());
        assert_eq!(mem2.active_cells(), mem.active_cells());

        for step in 6..14 {
            let a1 = sp.compute(&mut mem, &input(step), true).unwrap();
            let a2 = sp2.compute(&mut mem2, &input(step), true).unwrap();
            assert_eq!(a1, a2);
            assert_eq!(tm.compute(&mut mem, &a1, true).unwrap(), tm2.compute(&mut mem2, &a2, true).unwrap());
        }
        assert_eq!(sp.homeostatic_controller(), sp2.homeostatic_controller());
        assert_eq!(mem.to_text().unwrap(), mem2.to_text().unwrap());
    }

    #[test]
    fn test_snapshot_rejects_inconsistent_graph() {
        let (mem, sp, _) = trained();
        let json = NetworkSnapshot::new(mem, sp).to_json().unwrap();

        let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
        value["connections"]["num_synapses"] = serde_json::json!(100_000);
        let snapshot = NetworkSnapshot::<Sequential>::from_json(&value.to_string()).unwrap();

        assert!(matches!(
            snapshot.into_network(),
            Err(CorticalError::SerializationError { .. })
        ));
    }

    #[test]
    fn test_file_round_trip() {
        let (mem, _, _) = trained();
        let path = std::env::temp_dir().join(format!("cortical-snapshot-{}.bin", std::process::id()));

        mem.save_to_file(&path).unwrap();
        let restored = Connections::load_from_file(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(restored.winner_cells(), mem.winner_cells());
        assert_eq!(restored.overlap_duty_cycles(), mem.overlap_duty_cycles());
        restored.check_invariants().unwrap();
    }

    #[test]
    fn test_truncated_bytes_are_an_error() {
        let (mem, _, _) = trained();
        let bytes = mem.to_bytes(SerializableFormat::Binary).unwrap();
        assert!(matches!(
            Connections::from_bytes(&bytes[..bytes.len() / 2], SerializableFormat::Binary),
            Err(CorticalError::SerializationError { .. })
        ));
    }
}
