//! Photo folder discovery against mock folder trees.

use tether::camera::mock::{CANON_FOLDER, MockGateway, Operation};
use tether::camera::{FolderDiscovery, discover_photo_folder};
use tether::error::TetherError;

fn list_folder_calls(mock: &MockGateway) -> usize {
    mock.count(|op| matches!(op, Operation::ListFolders { .. }))
}

#[tokio::test]
async fn test_canon_layout() {
    let mock = MockGateway::canon();
    assert_eq!(discover_photo_folder(&mock).await.unwrap(), CANON_FOLDER);
}

#[tokio::test]
async fn test_highest_numbered_folder_wins() {
    let mock = MockGateway::canon();
    mock.set_folders(
        "/store_00010001/DCIM",
        &["100CANON", "103CANON", "87CANON", "CANONMSC"],
    );
    assert_eq!(
        discover_photo_folder(&mock).await.unwrap(),
        "/store_00010001/DCIM/103CANON"
    );
}

#[tokio::test]
async fn test_other_vendor_layouts() {
    let mock = MockGateway::new();
    mock.set_folders("/", &["store_00020001"]);
    mock.set_folders("/store_00020001", &["DCIM"]);
    mock.set_folders("/store_00020001/DCIM", &["100_FUJI", "101_FUJI"]);
    assert_eq!(
        discover_photo_folder(&mock).await.unwrap(),
        "/store_00020001/DCIM/101_FUJI"
    );
}

#[tokio::test]
async fn test_missing_levels_name_the_level() {
    let mock = MockGateway::new();
    mock.set_folders("/", &["special"]);
    assert!(matches!(
        discover_photo_folder(&mock).await,
        Err(TetherError::FolderNotFound { level: "storage root" })
    ));

    mock.set_folders("/", &["store_00010001"]);
    mock.set_folders("/store_00010001", &["MISC"]);
    assert!(matches!(
        discover_photo_folder(&mock).await,
        Err(TetherError::FolderNotFound { level: "DCIM" })
    ));

    mock.set_folders("/store_00010001", &["DCIM"]);
    mock.set_folders("/store_00010001/DCIM", &["MISC"]);
    assert!(matches!(
        discover_photo_folder(&mock).await,
        Err(TetherError::FolderNotFound { level: "photo folder" })
    ));
}

#[tokio::test]
async fn test_gateway_error_propagates() {
    let mock = MockGateway::new();
    assert!(matches!(
        discover_photo_folder(&mock).await,
        Err(TetherError::CommandFailed { .. })
    ));
}

#[tokio::test]
async fn test_result_cached_until_invalidated() {
    let mock = MockGateway::canon();
    let discovery = FolderDiscovery::new();

    assert_eq!(discovery.resolve(&mock).await.unwrap(), CANON_FOLDER);
    assert_eq!(discovery.resolve(&mock).await.unwrap(), CANON_FOLDER);
    assert_eq!(list_folder_calls(&mock), 3);
    assert_eq!(discovery.cached().as_deref(), Some(CANON_FOLDER));

    discovery.invalidate();
    assert_eq!(discovery.cached(), None);
    mock.set_folders("/store_00010001/DCIM", &["100CANON", "101CANON"]);
    assert_eq!(
        discovery.resolve(&mock).await.unwrap(),
        "/store_00010001/DCIM/101CANON"
    );
    assert_eq!(list_folder_calls(&mock), 6);
}

#[tokio::test]
async fn test_failed_discovery_not_cached() {
    let mock = MockGateway::new();
    let discovery = FolderDiscovery::new();

    assert!(discovery.resolve(&mock).await.is_err());
    assert_eq!(discovery.cached(), None);
}
