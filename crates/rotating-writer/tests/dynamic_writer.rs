use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use proven_rotating_writer::{
    DynamicRotatingWriter, MemoryHandle, WriteHandle, backup_path, open_file_handle, rotate_backups,
    serial_rotation, size_rotation,
};
use tempfile::tempdir;

fn files_in(dir: &Path) -> usize {
    fs::read_dir(dir).unwrap().count()
}

#[test]
fn test_serial_rotation_keeps_bounded_chain() {
    let dir = tempdir().unwrap();
    let head = dir.path().join("app.log");

    let writer = {
        let head = head.clone();
        DynamicRotatingWriter::new(
            |_: Option<&dyn WriteHandle>, generation: &u32| Ok(generation.to_string()),
            open_file_handle,
            move |_: &str, _: &u32| Ok(head.clone()),
            None,
        )
        .with_rotation(serial_rotation::<u32>(3))
    };

    for generation in 0..7_u32 {
        writer
            .write_with_ctx(generation.to_string().as_bytes(), &generation)
            .unwrap();
    }
    writer.close();

    assert_eq!(files_in(dir.path()), 4);
    assert_eq!(fs::read_to_string(&head).unwrap(), "6");
    assert_eq!(fs::read_to_string(backup_path(&head, 0)).unwrap(), "5");
    assert_eq!(fs::read_to_string(backup_path(&head, 1)).unwrap(), "4");
    assert_eq!(fs::read_to_string(backup_path(&head, 2)).unwrap(), "3");
}

#[test]
fn test_size_rotation_over_files() {
    let dir = tempdir().unwrap();
    let head = dir.path().join("app.log");
    let rotations = Arc::new(AtomicUsize::new(0));
    let opened = Arc::new(AtomicUsize::new(0));

    let writer = {
        let head = head.clone();
        let rotations = Arc::clone(&rotations);
        let opened = Arc::clone(&opened);
        DynamicRotatingWriter::new(
            size_rotation::<()>(4),
            move |path: &Path, ctx: &()| {
                opened.fetch_add(1, Ordering::SeqCst);
                open_file_handle(path, ctx)
            },
            move |_: &str, (): &()| Ok(head.clone()),
            None,
        )
        .with_rotation(move |_: &str, path: &Path, (): &()| {
            rotations.fetch_add(1, Ordering::SeqCst);
            rotate_backups(path, 5)
        })
    };

    for _ in 0..4 {
        assert_eq!(writer.write_with_ctx(b"test", &()).unwrap(), 4);
    }
    assert_eq!(writer.current_id().as_deref(), Some("1"));
    writer.close();

    assert_eq!(rotations.load(Ordering::SeqCst), 1);
    assert_eq!(opened.load(Ordering::SeqCst), 2);
    assert_eq!(fs::read_to_string(&head).unwrap(), "testtest");
    assert_eq!(
        fs::read_to_string(backup_path(&head, 0)).unwrap(),
        "testtest"
    );
}

#[test]
fn test_failed_rotation_surfaces_as_io_error() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("never-created");

    let mut writer = {
        let missing = missing.clone();
        let generation = AtomicUsize::new(0);
        DynamicRotatingWriter::new(
            move |_: Option<&dyn WriteHandle>, (): &()| {
                Ok(generation.fetch_add(1, Ordering::SeqCst).to_string())
            },
            |_: &Path, (): &()| {
                Ok(Arc::new(MemoryHandle::new()) as Arc<dyn WriteHandle>)
            },
            move |_: &str, (): &()| Ok(missing.clone()),
            None,
        )
        .with_rotation(serial_rotation::<()>(2))
    };

    io::Write::write_all(&mut writer, b"first").unwrap();

    // The memory handle never created the file, so there is nothing to rename.
    let err = io::Write::write_all(&mut writer, b"second").unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotFound);
    assert_eq!(writer.current_path(), None);

    io::Write::write_all(&mut writer, b"third").unwrap();
    assert_eq!(writer.current_path(), Some(missing));
}

#[test]
fn test_double_close_and_drop() {
    let dir = tempdir().unwrap();
    let head = dir.path().join("app.log");

    let writer = {
        let head = head.clone();
        DynamicRotatingWriter::new(
            |_: Option<&dyn WriteHandle>, (): &()| Ok("only".to_string()),
            open_file_handle,
            move |_: &str, (): &()| Ok(head.clone()),
            None,
        )
    };

    writer.write_with_ctx(b"kept", &()).unwrap();
    writer.close();
    writer.close();
    drop(writer);

    assert_eq!(fs::read_to_string(&head).unwrap(), "kept");
}
