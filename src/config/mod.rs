mod settings;

pub use settings::{SETTINGS_FILE_NAME, Settings, SettingsError, SimilaritySettings, SnapshotSettings};
