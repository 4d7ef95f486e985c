use super::*;

// =============================================================================
// parse_flag / env_flag
// =============================================================================

#[test]
fn parse_flag_accepts_common_spellings() {
    for raw in ["1", "true", "TRUE", " yes ", "on"] {
        assert_eq!(parse_flag(raw), Some(true), "{raw}");
    }
    for raw in ["0", "false", "No", "off"] {
        assert_eq!(parse_flag(raw), Some(false), "{raw}");
    }
    assert_eq!(parse_flag("maybe"), None);
    assert_eq!(parse_flag(""), None);
}

#[test]
fn env_flag_missing_returns_default() {
    assert!(env_flag("__TEST_DRAWSYNC_MISSING_FLAG__", true));
    assert!(!env_flag("__TEST_DRAWSYNC_MISSING_FLAG__", false));
}

#[test]
fn env_flag_invalid_returns_default() {
    unsafe { std::env::set_var("__TEST_DRAWSYNC_BAD_FLAG__", "sometimes") };
    assert!(env_flag("__TEST_DRAWSYNC_BAD_FLAG__", true));
    unsafe { std::env::remove_var("__TEST_DRAWSYNC_BAD_FLAG__") };
}

// =============================================================================
// SyncConfig
// =============================================================================

#[test]
fn defaults_send_snapshots_with_process_identity() {
    let config = SyncConfig::default();
    assert!(config.send_snapshots);
    assert!(config.source_id.is_none());
    assert_eq!(config.resolve_source_id(), SourceId::process());
}

#[test]
fn explicit_source_id_overrides_process_identity() {
    let config = SyncConfig { source_id: Some(SourceId::from("fixed")), ..SyncConfig::default() };
    assert_eq!(config.resolve_source_id(), SourceId::from("fixed"));
}

#[test]
fn from_env_reads_both_variables() {
    unsafe {
        std::env::set_var("DRAWSYNC_SEND_SNAPSHOTS", "false");
        std::env::set_var("DRAWSYNC_SOURCE_ID", "  peer-7 ");
    }
    let config = SyncConfig::from_env();
    unsafe {
        std::env::remove_var("DRAWSYNC_SEND_SNAPSHOTS");
        std::env::remove_var("DRAWSYNC_SOURCE_ID");
    }
    assert!(!config.send_snapshots);
    assert_eq!(config.source_id, Some(SourceId::from("peer-7")));
}
