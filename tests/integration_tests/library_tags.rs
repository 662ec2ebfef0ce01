// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The `make=system&family=library` tags and the library-level attributes.

use anyhow::Result;
use enip_client_rs::{
    status::Status,
    tag::{accessors, api},
};
use serial_test::serial;

#[tokio::test]
async fn version_tag_reads_the_crate_version() -> Result<()> {
    let tag = api::create("make=system&family=library&name=version", 100)
        .await
        .expect("create");
    assert_eq!(api::read(tag, 1000).await, Status::Ok);

    let entry = api::entry(tag).expect("entry");
    let size = api::get_int_attribute(tag, "size", -1);
    assert!(size > 0);
    let mut buf = vec![0u8; size as usize];
    accessors::get_block(&entry, 0, &mut buf).expect("block");
    let text = String::from_utf8(buf).expect("ascii version");
    assert_eq!(text, env!("CARGO_PKG_VERSION"));

    assert_eq!(api::destroy(tag).await, Status::Ok);
    Ok(())
}

#[tokio::test]
#[serial]
async fn debug_tag_round_trips_the_level() -> Result<()> {
    let tag = api::create("make=system&family=library&name=debug", 100)
        .await
        .expect("create");

    assert_eq!(api::read(tag, 1000).await, Status::Ok);
    let entry = api::entry(tag).expect("entry");

    accessors::set_uint32(&entry, 0, 4).expect("set");
    assert_eq!(api::write(tag, 1000).await, Status::Ok);
    assert_eq!(api::get_int_attribute(0, "debug", -1), 4);

    accessors::set_uint32(&entry, 0, 2).expect("set");
    assert_eq!(api::write(tag, 1000).await, Status::Ok);
    assert_eq!(api::get_int_attribute(0, "debug", -1), 2);

    assert_eq!(api::destroy(tag).await, Status::Ok);
    Ok(())
}

#[tokio::test]
#[serial]
async fn set_debug_level_through_attributes() -> Result<()> {
    assert_eq!(api::set_int_attribute(0, "debug", 3), Status::Ok);
    assert_eq!(api::get_int_attribute(0, "debug", -1), 3);
    assert_eq!(api::set_int_attribute(0, "nonsense", 1), Status::Unsupported);
    api::set_debug_level(2);
    Ok(())
}

#[tokio::test]
async fn version_attributes_and_compat_check() -> Result<()> {
    let major = api::get_int_attribute(0, "version_major", -1);
    let minor = api::get_int_attribute(0, "version_minor", -1);
    let patch = api::get_int_attribute(0, "version_patch", -1);
    assert!(major >= 0 && minor >= 0 && patch >= 0);

    assert_eq!(api::check_lib_version(major, minor, patch), Status::Ok);
    assert_eq!(api::check_lib_version(major + 1, 0, 0), Status::Unsupported);
    assert_eq!(api::check_lib_version(major, minor + 1, 0), Status::Unsupported);
    Ok(())
}

#[tokio::test]
async fn callbacks_are_single_slot() -> Result<()> {
    let tag = api::create("make=system&family=library&name=version", 100)
        .await
        .expect("create");

    assert_eq!(api::register_callback(tag, std::sync::Arc::new(|_, _, _| {})), Status::Ok);
    assert_eq!(
        api::register_callback(tag, std::sync::Arc::new(|_, _, _| {})),
        Status::Duplicate
    );
    assert_eq!(api::unregister_callback(tag), Status::Ok);
    assert_eq!(api::unregister_callback(tag), Status::NotFound);

    assert_eq!(api::destroy(tag).await, Status::Ok);
    Ok(())
}

#[tokio::test]
async fn advisory_lock_is_reentrant() -> Result<()> {
    let tag = api::create("make=system&family=library&name=version", 100)
        .await
        .expect("create");
    assert_eq!(api::lock(tag), Status::Ok);
    assert_eq!(api::lock(tag), Status::Ok);
    assert_eq!(api::unlock(tag), Status::Ok);
    assert_eq!(api::unlock(tag), Status::Ok);
    assert_eq!(api::unlock(tag), Status::NotAllowed);
    assert_eq!(api::destroy(tag).await, Status::Ok);
    Ok(())
}
