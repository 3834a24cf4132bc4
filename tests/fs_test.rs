use tinyfs::io::{BlockStorage, FileBlockEmulator, FileBlockEmulatorBuilder};
use tinyfs::{
    mode, Directory, FsError, Geometry, InodeHandle, SuperBlock, BLOCK_SIZE, MAX_FILE_SIZE,
    ROOT_INO, TFS,
};

fn small_geometry() -> Geometry {
    Geometry::new(64, 64).unwrap()
}

fn device(geo: &Geometry) -> FileBlockEmulator {
    let fd = tempfile::tempfile().unwrap();
    FileBlockEmulatorBuilder::from(fd)
        .with_block_count(geo.total_blocks() as usize)
        .build()
        .expect("Could not initialize disk emulator.")
}

fn fresh_fs() -> TFS<FileBlockEmulator> {
    let geo = small_geometry();
    TFS::format(device(&geo), geo).unwrap()
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

#[test]
fn format_creates_root_with_dot_entries() {
    let mut fs = fresh_fs();
    let mut root = Directory::load(&mut fs, ROOT_INO).unwrap();

    assert!(root.inode().is_dir());
    assert_eq!(root.inode().refcount(), 2);
    assert_eq!(root.inode().size(), BLOCK_SIZE);

    let entries = root.entries(&mut fs).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].name_bytes(), b".");
    assert_eq!(entries[0].ino, ROOT_INO);
    assert_eq!(entries[1].name_bytes(), b"..");
    assert_eq!(entries[1].ino, ROOT_INO);

    assert!(!root.has_nontrivial_child(&mut fs).unwrap());
}

#[test]
fn create_write_read_shrink_remove_scenario() {
    let mut fs = fresh_fs();
    let mut root = Directory::load(&mut fs, ROOT_INO).unwrap();

    let mut file = fs.create_inode(mode::S_IFREG | 0o644).unwrap();
    root.add(&mut fs, file.ino(), "a.txt").unwrap();
    file.add_ref();

    let data = pattern(5000);
    assert_eq!(file.write(&mut fs, 0, &data).unwrap(), 5000);

    let mut readback = vec![0u8; 5000];
    assert_eq!(file.read(&mut fs, 0, &mut readback).unwrap(), 5000);
    assert_eq!(readback, data);

    file.shrink_to(&mut fs, 10).unwrap();
    let mut buf = vec![0u8; BLOCK_SIZE];
    let n = file.read(&mut fs, 0, &mut buf).unwrap();
    assert_eq!(n, 10);
    assert_eq!(&buf[..10], &data[..10]);
    file.persist(&mut fs).unwrap();

    root.remove(&mut fs, "a.txt").unwrap();
    root.persist(&mut fs).unwrap();
    assert_eq!(root.lookup(&mut fs, "a.txt").unwrap(), None);
}

#[test]
fn indirect_addressing_round_trips() {
    let mut fs = fresh_fs();
    let mut file = fs.create_inode(mode::S_IFREG | 0o644).unwrap();

    // Six blocks and change: crosses from the direct links into the first
    // indirect block.
    let len = 6 * BLOCK_SIZE + 123;
    let data = pattern(len);
    assert_eq!(file.write(&mut fs, 0, &data).unwrap(), len);
    assert_eq!(file.size(), len);

    let mut readback = vec![0u8; len];
    assert_eq!(file.read(&mut fs, 0, &mut readback).unwrap(), len);
    assert_eq!(readback, data);

    // Rewriting the same range is idempotent.
    assert_eq!(file.write(&mut fs, 0, &data).unwrap(), len);
    let mut again = vec![0u8; len];
    file.read(&mut fs, 0, &mut again).unwrap();
    assert_eq!(again, data);

    // A read straddling the direct/indirect boundary.
    let start = 5 * BLOCK_SIZE - 100;
    let mut window = vec![0u8; 300];
    assert_eq!(file.read(&mut fs, start, &mut window).unwrap(), 300);
    assert_eq!(window, &data[start..start + 300]);

    file.persist(&mut fs).unwrap();
}

#[test]
fn growth_shrink_symmetry_zeroes_reexposed_bytes() {
    let mut fs = fresh_fs();
    let mut file = fs.create_inode(mode::S_IFREG | 0o644).unwrap();

    let len = 7 * BLOCK_SIZE;
    let data = pattern(len);
    file.write(&mut fs, 0, &data).unwrap();

    let free_while_full = fs.free_data_blocks();
    file.shrink_to(&mut fs, 100).unwrap();
    assert_eq!(file.size(), 100);
    // Six content blocks plus the indirect block itself came back.
    assert_eq!(fs.free_data_blocks(), free_while_full + 7);

    file.extend_to(len).unwrap();
    assert_eq!(file.size(), len);
    // Extending is sparse: nothing was reallocated.
    assert_eq!(fs.free_data_blocks(), free_while_full + 7);

    let mut readback = vec![0u8; len];
    assert_eq!(file.read(&mut fs, 0, &mut readback).unwrap(), len);
    assert_eq!(&readback[..100], &data[..100]);
    assert!(readback[100..].iter().all(|&b| b == 0));

    file.persist(&mut fs).unwrap();
}

#[test]
fn sparse_write_materializes_only_touched_blocks() {
    let mut fs = fresh_fs();
    let mut file = fs.create_inode(mode::S_IFREG | 0o644).unwrap();

    let free_before = fs.free_data_blocks();
    let data = pattern(100);
    file.write(&mut fs, 10_000, &data).unwrap();
    assert_eq!(file.size(), 10_100);
    // Offset 10000 lands in logical block 2; blocks 0 and 1 stay holes.
    assert_eq!(fs.free_data_blocks(), free_before - 1);

    let mut hole = vec![0xFFu8; 100];
    file.read(&mut fs, 0, &mut hole).unwrap();
    assert!(hole.iter().all(|&b| b == 0));

    let mut readback = vec![0u8; 100];
    file.read(&mut fs, 10_000, &mut readback).unwrap();
    assert_eq!(readback, data);

    file.persist(&mut fs).unwrap();
}

#[test]
fn directory_add_is_an_upsert() {
    let mut fs = fresh_fs();
    let mut root = Directory::load(&mut fs, ROOT_INO).unwrap();

    let first = fs.create_inode(mode::S_IFREG | 0o644).unwrap();
    let second = fs.create_inode(mode::S_IFREG | 0o644).unwrap();

    root.add(&mut fs, first.ino(), "x").unwrap();
    root.add(&mut fs, second.ino(), "x").unwrap();

    let named_x: Vec<_> = root
        .entries(&mut fs)
        .unwrap()
        .into_iter()
        .filter(|e| e.name_bytes() == b"x")
        .collect();
    assert_eq!(named_x.len(), 1);
    assert_eq!(named_x[0].ino, second.ino());
    assert_eq!(root.lookup(&mut fs, "x").unwrap(), Some(second.ino()));

    root.persist(&mut fs).unwrap();
}

#[test]
fn directory_grows_by_whole_blocks() {
    let mut fs = fresh_fs();
    let mut root = Directory::load(&mut fs, ROOT_INO).unwrap();
    let file = fs.create_inode(mode::S_IFREG | 0o644).unwrap();

    // Root starts with "." and ".."; 126 more entries fill the first block.
    for i in 0..126 {
        root.add(&mut fs, file.ino(), &format!("f{:03}", i)).unwrap();
    }
    assert_eq!(root.inode().size(), BLOCK_SIZE);

    root.add(&mut fs, file.ino(), "straw").unwrap();
    assert_eq!(root.inode().size(), 2 * BLOCK_SIZE);
    assert_eq!(root.entries(&mut fs).unwrap().len(), 129);
    assert_eq!(root.lookup(&mut fs, "straw").unwrap(), Some(file.ino()));

    root.persist(&mut fs).unwrap();
}

#[test]
fn removed_slot_is_reused_in_storage_order() {
    let mut fs = fresh_fs();
    let mut root = Directory::load(&mut fs, ROOT_INO).unwrap();
    let file = fs.create_inode(mode::S_IFREG | 0o644).unwrap();

    root.add(&mut fs, file.ino(), "a").unwrap();
    root.add(&mut fs, file.ino(), "b").unwrap();
    root.add(&mut fs, file.ino(), "c").unwrap();
    root.remove(&mut fs, "b").unwrap();
    root.add(&mut fs, file.ino(), "d").unwrap();

    assert_eq!(root.inode().size(), BLOCK_SIZE);
    let names: Vec<_> = root
        .entries(&mut fs)
        .unwrap()
        .iter()
        .map(|e| e.name_bytes().to_vec())
        .collect();
    assert_eq!(
        names,
        vec![
            b".".to_vec(),
            b"..".to_vec(),
            b"a".to_vec(),
            b"d".to_vec(),
            b"c".to_vec()
        ]
    );

    assert!(matches!(
        root.remove(&mut fs, "missing"),
        Err(FsError::NotFound)
    ));
    root.persist(&mut fs).unwrap();
}

#[test]
fn data_block_exhaustion_reports_no_space() {
    let geo = Geometry::new(16, 8).unwrap();
    let mut fs = TFS::format(device(&geo), geo).unwrap();
    let mut file = fs.create_inode(mode::S_IFREG | 0o644).unwrap();

    let block = pattern(BLOCK_SIZE);
    let mut written = 0;
    let err = loop {
        match file.write(&mut fs, written, &block) {
            Ok(n) => written += n,
            Err(e) => break e,
        }
    };
    assert!(matches!(err, FsError::Exhausted));
    assert_eq!(fs.free_data_blocks(), 0);

    // Everything written before the wall still reads back intact.
    let mut readback = vec![0u8; written];
    file.read(&mut fs, 0, &mut readback).unwrap();
    assert_eq!(readback, pattern(BLOCK_SIZE).repeat(written / BLOCK_SIZE));

    file.persist(&mut fs).unwrap();
}

#[test]
fn unmount_marks_clean_and_state_survives_remount() {
    let geo = small_geometry();
    let mut fs = TFS::format(device(&geo), geo).unwrap();

    let mut root = Directory::load(&mut fs, ROOT_INO).unwrap();
    let mut file = fs.create_inode(mode::S_IFREG | 0o644).unwrap();
    let ino = file.ino();
    root.add(&mut fs, ino, "persist.txt").unwrap();
    file.add_ref();
    let data = pattern(2000);
    file.write(&mut fs, 0, &data).unwrap();
    file.persist(&mut fs).unwrap();
    root.persist(&mut fs).unwrap();
    let free_data = fs.free_data_blocks();

    let mut dev = fs.unmount().unwrap();
    let mut buf = [0u8; BLOCK_SIZE];
    dev.read_block(1, &mut buf).unwrap();
    assert_eq!(SuperBlock::parse(&buf).unwrap().clean, 1);

    let mut fs = TFS::mount(dev, geo).unwrap();
    assert_eq!(fs.free_data_blocks(), free_data);

    let mut root = Directory::load(&mut fs, ROOT_INO).unwrap();
    assert_eq!(root.lookup(&mut fs, "persist.txt").unwrap(), Some(ino));

    let mut file = InodeHandle::load(&mut fs, ino).unwrap();
    assert_eq!(file.size(), 2000);
    let mut readback = vec![0u8; 2000];
    file.read(&mut fs, 0, &mut readback).unwrap();
    assert_eq!(readback, data);

    // A second unmount round-trips the clean flag again.
    let mut dev = fs.unmount().unwrap();
    dev.read_block(1, &mut buf).unwrap();
    assert_eq!(SuperBlock::parse(&buf).unwrap().clean, 1);
}

#[test]
fn mounting_unformatted_storage_fails() {
    let geo = small_geometry();
    let dev = device(&geo);
    assert!(matches!(
        TFS::mount(dev, geo),
        Err(FsError::InvalidMagic)
    ));
}

#[test]
fn deref_to_zero_reclaims_inode_and_blocks() {
    let mut fs = fresh_fs();
    let free_inodes = fs.free_inodes();
    let free_data = fs.free_data_blocks();

    let mut root = Directory::load(&mut fs, ROOT_INO).unwrap();
    let mut file = fs.create_inode(mode::S_IFREG | 0o644).unwrap();
    let ino = file.ino();
    root.add(&mut fs, ino, "doomed").unwrap();
    file.add_ref();
    // Spill into the indirect range so reclamation covers link blocks too.
    file.write(&mut fs, 0, &pattern(6 * BLOCK_SIZE)).unwrap();
    file.persist(&mut fs).unwrap();

    root.remove(&mut fs, "doomed").unwrap();
    root.persist(&mut fs).unwrap();
    assert!(file.deref(&mut fs).unwrap().is_none());

    assert_eq!(fs.free_inodes(), free_inodes);
    assert_eq!(fs.free_data_blocks(), free_data);

    // The released number is available again.
    let reused = fs.create_inode(mode::S_IFREG | 0o644).unwrap();
    assert_eq!(reused.ino(), ino);
    assert_eq!(reused.size(), 0);
    assert_eq!(reused.refcount(), 0);
}

#[test]
fn hard_links_share_an_inode() {
    let mut fs = fresh_fs();
    let mut root = Directory::load(&mut fs, ROOT_INO).unwrap();

    let mut file = fs.create_inode(mode::S_IFREG | 0o644).unwrap();
    let ino = file.ino();
    root.add(&mut fs, ino, "first").unwrap();
    file.add_ref();
    root.add(&mut fs, ino, "second").unwrap();
    file.add_ref();
    assert_eq!(file.refcount(), 2);
    file.persist(&mut fs).unwrap();

    root.remove(&mut fs, "first").unwrap();
    let file = InodeHandle::load(&mut fs, ino).unwrap();
    let file = file.deref(&mut fs).unwrap();
    assert!(file.is_some());
    let mut file = file.unwrap();
    assert_eq!(file.refcount(), 1);
    file.persist(&mut fs).unwrap();

    assert_eq!(root.lookup(&mut fs, "second").unwrap(), Some(ino));
    root.persist(&mut fs).unwrap();
}

#[test]
fn symlink_target_round_trips() {
    let mut fs = fresh_fs();
    let mut root = Directory::load(&mut fs, ROOT_INO).unwrap();

    let mut link = fs.create_inode(mode::S_IFLNK | 0o777).unwrap();
    let target = b"../shared/data/archive.tar";
    link.write(&mut fs, 0, target).unwrap();
    root.add(&mut fs, link.ino(), "archive").unwrap();
    link.add_ref();
    link.persist(&mut fs).unwrap();
    root.persist(&mut fs).unwrap();

    let mut link = InodeHandle::load(&mut fs, link.ino()).unwrap();
    assert!(link.is_symlink());
    assert_eq!(link.size(), target.len());
    let mut readback = vec![0u8; target.len()];
    link.read(&mut fs, 0, &mut readback).unwrap();
    assert_eq!(readback, target);
}

#[test]
fn subdirectories_nest_and_report_children() {
    let mut fs = fresh_fs();
    let mut root = Directory::load(&mut fs, ROOT_INO).unwrap();

    let child = fs.create_inode(mode::S_IFDIR | 0o755).unwrap();
    let child_ino = child.ino();
    let mut childdir = Directory::from_handle(child).unwrap();
    childdir.add(&mut fs, child_ino, ".").unwrap();
    childdir.add(&mut fs, ROOT_INO, "..").unwrap();
    root.add(&mut fs, child_ino, "sub").unwrap();

    let mut child = childdir.into_inner();
    child.add_ref();
    child.add_ref();
    child.persist(&mut fs).unwrap();
    root.persist(&mut fs).unwrap();

    assert!(root.has_nontrivial_child(&mut fs).unwrap());

    let mut childdir = Directory::load(&mut fs, child_ino).unwrap();
    assert!(!childdir.has_nontrivial_child(&mut fs).unwrap());
    assert_eq!(childdir.lookup(&mut fs, "..").unwrap(), Some(ROOT_INO));

    // A regular file cannot be opened as a directory.
    let plain = fs.create_inode(mode::S_IFREG | 0o644).unwrap();
    let plain_ino = plain.ino();
    drop(plain);
    assert!(matches!(
        Directory::load(&mut fs, plain_ino),
        Err(FsError::NotDirectory)
    ));
}

#[test]
fn oversized_names_are_rejected_not_truncated() {
    let mut fs = fresh_fs();
    let mut root = Directory::load(&mut fs, ROOT_INO).unwrap();
    let file = fs.create_inode(mode::S_IFREG | 0o644).unwrap();

    let long = "n".repeat(28);
    assert!(matches!(
        root.add(&mut fs, file.ino(), &long),
        Err(FsError::InvalidArgument(_))
    ));

    // 27 bytes is the widest name that fits.
    let widest = "w".repeat(27);
    root.add(&mut fs, file.ino(), &widest).unwrap();
    assert_eq!(root.lookup(&mut fs, &widest).unwrap(), Some(file.ino()));
    root.persist(&mut fs).unwrap();
}

#[test]
fn capacity_limit_is_a_distinct_error() {
    let mut fs = fresh_fs();
    let mut file = fs.create_inode(mode::S_IFREG | 0o644).unwrap();

    assert!(matches!(
        file.write(&mut fs, MAX_FILE_SIZE - 1, &[1, 2]),
        Err(FsError::TooLarge)
    ));
    assert!(matches!(
        file.extend_to(MAX_FILE_SIZE + 1),
        Err(FsError::TooLarge)
    ));

    // Extending to the exact capacity is legal and allocates nothing.
    let free = fs.free_data_blocks();
    file.extend_to(MAX_FILE_SIZE).unwrap();
    assert_eq!(file.size(), MAX_FILE_SIZE);
    assert_eq!(fs.free_data_blocks(), free);
    file.persist(&mut fs).unwrap();
}

#[test]
fn reads_clamp_to_content_length() {
    let mut fs = fresh_fs();
    let mut file = fs.create_inode(mode::S_IFREG | 0o644).unwrap();
    file.write(&mut fs, 0, &pattern(100)).unwrap();

    let mut buf = vec![0u8; 500];
    assert_eq!(file.read(&mut fs, 0, &mut buf).unwrap(), 100);
    assert_eq!(file.read(&mut fs, 100, &mut buf).unwrap(), 0);
    assert_eq!(file.read(&mut fs, 5000, &mut buf).unwrap(), 0);

    file.persist(&mut fs).unwrap();
}
