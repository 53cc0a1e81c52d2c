use wasmlink_core::table_space::{self, SlotTarget};
use wasmlink_core::LinkError;

#[test]
fn constants() {
    assert_eq!(table_space::SLOT_SIZE, 1024);
    assert_eq!(table_space::MAX_INSTANCE_ID, 0x3FFC1);
    assert_eq!(
        table_space::BUILTIN_LIBC_REGION_START,
        (table_space::MAX_INSTANCE_ID + 9) << 10
    );
}

#[test]
fn regions_are_disjoint() {
    let ids = [1, 2, 3, 100, table_space::MAX_INSTANCE_ID - 1, table_space::MAX_INSTANCE_ID];
    let mut regions = Vec::new();
    for id in ids {
        let start = table_space::region_for(id, table_space::SLOT_SIZE).unwrap();
        assert!(
            start + table_space::SLOT_SIZE <= table_space::BUILTIN_LIBC_REGION_START,
            "region of {id} overlaps builtin libc"
        );
        regions.push(start..start + table_space::SLOT_SIZE);
    }

    for (i, a) in regions.iter().enumerate() {
        for b in regions.iter().skip(i + 1) {
            assert!(a.end <= b.start || b.end <= a.start, "{a:?} overlaps {b:?}");
        }
    }

    assert_eq!(table_space::region_for(1, 0), Ok(0));
    assert_eq!(table_space::region_for(2, 16), Ok(1024));
}

#[test]
fn region_too_large() {
    assert_eq!(
        table_space::region_for(2, 1025),
        Err(LinkError::TableSpaceExhausted { needed: 1025 })
    );
    assert!(table_space::region_for(0, 1).is_err());
    assert!(table_space::region_for(table_space::MAX_INSTANCE_ID + 1, 1).is_err());
    assert_eq!(
        table_space::region_for(table_space::BUILTIN_LIBC_INSTANCE_ID, 4),
        Ok(table_space::BUILTIN_LIBC_REGION_START)
    );
}

#[test]
fn decode_dependency_slot() {
    let target = SlotTarget::decode(1025).unwrap();
    assert_eq!(target, SlotTarget::Instance { id: 2, local: 1 });
    assert_eq!(target.instance_id(), 2);
    assert_eq!(target.encode(), 1025);
}

#[test]
fn decode_special_slots() {
    assert_eq!(SlotTarget::decode(5), Ok(SlotTarget::Root { local: 5 }));
    assert_eq!(
        SlotTarget::decode(table_space::BUILTIN_LIBC_REGION_START + 3),
        Ok(SlotTarget::Libc { index: 3 })
    );
    assert_eq!(
        SlotTarget::decode(0x8000_0000),
        Err(LinkError::UndefinedElement { slot: 0x8000_0000 })
    );

    let past_last_instance = table_space::MAX_INSTANCE_ID << 10;
    assert_eq!(
        SlotTarget::decode(past_last_instance),
        Err(LinkError::UndefinedElement {
            slot: past_last_instance
        })
    );
}

#[test]
fn export_slots_occupy_region_top() {
    assert_eq!(table_space::export_slot(2, 3, 0), 2048 - 3);
    assert_eq!(table_space::export_slot(2, 3, 2), 2047);
    assert_eq!(
        SlotTarget::decode(table_space::export_slot(1, 1, 0)),
        Ok(SlotTarget::Root { local: 1023 })
    );
}
