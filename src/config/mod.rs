mod settings;

pub use settings::{
    ApprovalConfig, IntervalsConfig, SyncConfig, TandemConfig, CONFIG_DIR, CONFIG_FILE,
};
