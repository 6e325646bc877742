//! Unit tests for event channel provisioning.

use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};

use mockall::mock;
use rstest::rstest;

use super::*;
use crate::test_support::ServiceTree;

mock! {
    FifoFs {}
    impl FifoDirFs for FifoFs {
        fn make_fifodir(&self, path: &Utf8Path, config: &ChannelConfig) -> io::Result<()>;
    }
}

fn mode_of(path: &Utf8Path) -> u32 {
    fs::metadata(path).expect("stat fifodir").permissions().mode() & 0o7777
}

#[test]
fn event_path_appends_event_directory() {
    let path = event_path(Utf8Path::new("/run/service/web")).expect("event path");
    assert_eq!(path, Utf8PathBuf::from("/run/service/web/event"));
}

#[test]
fn event_path_accepts_the_longest_fitting_target() {
    let longest = "a".repeat(PATH_LIMIT - "/event".len() - 1);
    let path = event_path(Utf8Path::new(&longest)).expect("fits exactly");
    assert_eq!(path.as_str().len() + 1, PATH_LIMIT);
}

#[rstest]
#[case::empty("")]
#[case::nul("svc\0dir")]
fn event_path_rejects_malformed_targets(#[case] target: &str) {
    let error = event_path(Utf8Path::new(target)).expect_err("target must be rejected");
    assert!(matches!(error, WatchError::InvalidInput { .. }));
}

#[test]
fn overlong_target_is_rejected_before_touching_the_filesystem() {
    let mut fs = MockFifoFs::new();
    fs.expect_make_fifodir().never();
    let provisioner = ChannelProvisioner::with_fs(fs, ChannelConfig::default());
    let target = "s".repeat(PATH_LIMIT - "/event".len());

    let error = provisioner
        .prepare_channel(Utf8Path::new(&target))
        .expect_err("path must be too long");

    match error {
        WatchError::PathTooLong { length, limit, .. } => {
            assert_eq!(length, PATH_LIMIT + 1);
            assert_eq!(limit, PATH_LIMIT);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn provisioner_passes_configuration_to_the_filesystem() {
    let config = ChannelConfig::default().with_group(Some(4321)).with_mode(0o3770);
    let mut fs = MockFifoFs::new();
    fs.expect_make_fifodir()
        .once()
        .withf(|path, config| {
            path.as_str() == "/srv/db/event"
                && config.group() == Some(4321)
                && config.effective_mode() == 0o3770
        })
        .returning(|_, _| Ok(()));
    let provisioner = ChannelProvisioner::with_fs(fs, config);

    let event_dir = provisioner
        .prepare_channel(Utf8Path::new("/srv/db"))
        .expect("prepare channel");
    assert_eq!(event_dir, Utf8PathBuf::from("/srv/db/event"));
}

#[test]
fn filesystem_failures_surface_as_channel_errors() {
    let mut fs = MockFifoFs::new();
    fs.expect_make_fifodir()
        .once()
        .returning(|_, _| Err(io::Error::from_raw_os_error(libc::EROFS)));
    let provisioner = ChannelProvisioner::with_fs(fs, ChannelConfig::default());

    let error = provisioner
        .prepare_channel(Utf8Path::new("/srv/db"))
        .expect_err("creation must fail");
    match error {
        WatchError::ChannelCreateFailed { path, source } => {
            assert_eq!(path, Utf8PathBuf::from("/srv/db/event"));
            assert_eq!(source.raw_os_error(), Some(libc::EROFS));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn default_configuration_uses_the_real_group() {
    let config = ChannelConfig::default();
    assert_eq!(config.group(), Some(getgid().as_raw()));
    assert_eq!(config.effective_mode(), DEFAULT_FIFODIR_MODE);
    assert!(!config.force());
}

#[test]
fn groupless_configuration_publishes_the_fifodir() {
    let config = ChannelConfig::default().with_group(None);
    assert_eq!(config.effective_mode(), PUBLIC_FIFODIR_MODE);
}

#[test]
fn configuration_deserialises_over_the_defaults() {
    let config: ChannelConfig =
        serde_json::from_str(r#"{ "group": null, "force": true }"#).expect("parse config");

    assert_eq!(config, ChannelConfig::default().with_group(None).with_force(true));
    assert_eq!(config.effective_mode(), PUBLIC_FIFODIR_MODE);
}

#[test]
fn configuration_deserialises_an_explicit_group_and_mode() {
    let config: ChannelConfig =
        serde_json::from_str(r#"{ "group": 5, "mode": 1000 }"#).expect("parse config");

    assert_eq!(config.group(), Some(5));
    assert_eq!(config.effective_mode(), 0o1750);
    assert!(!config.force());
}

#[test]
fn system_fs_creates_fifodir_with_group_and_mode() {
    let tree = ServiceTree::new();
    let service = tree.service("web");
    let provisioner = ChannelProvisioner::new(ChannelConfig::default());

    let event_dir = provisioner.prepare_channel(&service).expect("prepare channel");

    let metadata = fs::metadata(&event_dir).expect("stat fifodir");
    assert!(metadata.is_dir());
    assert_eq!(metadata.gid(), getgid().as_raw());
    assert_eq!(mode_of(&event_dir), DEFAULT_FIFODIR_MODE);
}

#[test]
fn system_fs_leaves_existing_fifodir_alone_without_force() {
    let tree = ServiceTree::new();
    let service = tree.service("web");
    let event_dir = service.join(EVENT_DIR);
    fs::create_dir(&event_dir).expect("pre-create fifodir");
    fs::set_permissions(&event_dir, Permissions::from_mode(0o700)).expect("chmod");

    ChannelProvisioner::new(ChannelConfig::default())
        .prepare_channel(&service)
        .expect("prepare channel");

    assert_eq!(mode_of(&event_dir), 0o700);
}

#[test]
fn system_fs_repairs_existing_fifodir_with_force() {
    let tree = ServiceTree::new();
    let service = tree.service("web");
    let event_dir = service.join(EVENT_DIR);
    fs::create_dir(&event_dir).expect("pre-create fifodir");
    fs::set_permissions(&event_dir, Permissions::from_mode(0o700)).expect("chmod");

    ChannelProvisioner::new(ChannelConfig::default().with_force(true))
        .prepare_channel(&service)
        .expect("prepare channel");

    assert_eq!(mode_of(&event_dir), DEFAULT_FIFODIR_MODE);
}

#[test]
fn system_fs_rejects_a_file_in_place_of_the_fifodir() {
    let tree = ServiceTree::new();
    let service = tree.service("web");
    fs::write(service.join(EVENT_DIR), b"not a directory").expect("write file");

    let error = ChannelProvisioner::new(ChannelConfig::default())
        .prepare_channel(&service)
        .expect_err("file must be rejected");
    match error {
        WatchError::ChannelCreateFailed { source, .. } => {
            assert_eq!(source.raw_os_error(), Some(libc::ENOTDIR));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn system_fs_reports_missing_service_directory() {
    let tree = ServiceTree::new();
    let missing = tree.missing("gone");

    let error = ChannelProvisioner::new(ChannelConfig::default())
        .prepare_channel(&missing)
        .expect_err("parent does not exist");
    match error {
        WatchError::ChannelCreateFailed { source, .. } => {
            assert_eq!(source.kind(), io::ErrorKind::NotFound);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
