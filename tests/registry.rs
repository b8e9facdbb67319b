//! Tests for the address-keyed device registry.

mod common;

use common::*;
use ld2410_ble::DeviceRegistry;

#[test]
fn test_insert_and_lookup_is_case_insensitive() {
    let registry = DeviceRegistry::new();
    assert!(registry.is_empty());

    let (device, _link) = mock_device(test_config("aa:bb:cc:dd:ee:ff"));
    assert!(registry.insert(device).is_none());

    assert_eq!(registry.len(), 1);
    let found = registry
        .get("AA:BB:CC:DD:EE:FF")
        .expect("case should not matter");
    assert_eq!(found.address(), "aa:bb:cc:dd:ee:ff");
    assert!(registry.get("11:22:33:44:55:66").is_none());
}

#[test]
fn test_insert_replaces_same_address() {
    let registry = DeviceRegistry::new();
    let (first, _link) = mock_device(test_config("AA:BB:CC:DD:EE:FF"));
    let (second, _link) = mock_device(test_config("aa:bb:cc:dd:ee:ff"));

    assert!(registry.insert(first).is_none());
    let replaced = registry.insert(second).expect("same radar, new handle");
    assert_eq!(replaced.address(), "AA:BB:CC:DD:EE:FF");
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_get_or_insert_with_creates_once() {
    let registry = DeviceRegistry::new();
    let mut created = 0;

    for _ in 0..3 {
        registry.get_or_insert_with("AA:BB:CC:DD:EE:FF", || {
            created += 1;
            let (device, _link) = mock_device(test_config("AA:BB:CC:DD:EE:FF"));
            device
        });
    }
    assert_eq!(created, 1);
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_remove() {
    let registry = DeviceRegistry::new();
    let (device, _link) = mock_device(test_config("AA:BB:CC:DD:EE:FF"));
    registry.insert(device);

    assert_eq!(registry.addresses(), vec!["AA:BB:CC:DD:EE:FF".to_string()]);
    assert!(registry.remove("aa:bb:cc:dd:ee:ff").is_some());
    assert!(registry.is_empty());
    assert!(registry.remove("aa:bb:cc:dd:ee:ff").is_none());
}
