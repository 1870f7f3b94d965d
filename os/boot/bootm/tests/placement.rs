mod common;

use bootm::memory::PhysicalMemory;
use bootm::{
    BootDescriptor, BootError, ComponentKind, FileType, ImageLocator, PhysRange, PhysicalAddress,
    RegionAllocator, RegionError, SimulatedRam,
};
use common::{MARGIN, MockPlatform, RAM_BASE};
use proptest::prelude::*;

fn read(ctx: &mut bootm::LoadContext<'_>, addr: PhysicalAddress, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    ctx.memory().read(addr, &mut buf).unwrap();
    buf
}

#[test]
fn small_zimage_lands_above_the_margin() {
    let banks = common::banks();
    let mut ram = SimulatedRam::new(banks.clone());
    let mut ctx = common::context(&banks, &mut ram);

    let kernel = common::zimage(4096);
    let desc = BootDescriptor::new(ImageLocator::buffer("zImage", kernel.clone()));
    let image = ctx.load(&desc).unwrap();

    assert_eq!(image.file_type(), FileType::ArmZimage);
    assert_eq!(image.components().len(), 1);
    let primary = image.primary();
    assert_eq!(primary.kind(), ComponentKind::Primary);
    assert_eq!(primary.start().as_u64(), RAM_BASE + MARGIN);
    assert_eq!(primary.size(), 4096);
    assert_eq!(image.entry(), primary.start());
    assert_eq!(read(&mut ctx, primary.start(), 4096), kernel);
}

#[test]
fn dry_run_never_touches_the_platform() {
    let banks = common::banks();
    let mut ram = SimulatedRam::new(banks.clone());
    let mut ctx = common::context(&banks, &mut ram);
    let mut platform = MockPlatform::default();

    let desc = BootDescriptor::new(ImageLocator::buffer("zImage", common::zimage(4096)))
        .with_initrd(ImageLocator::buffer("initrd", vec![0xA5; 1000]))
        .with_dry_run(true);
    let placed = unsafe { bootm::bootm(&mut ctx, &desc, &mut platform) }.unwrap();

    assert!(platform.calls.is_empty());
    assert_eq!(placed.image().components().len(), 2);
    assert_eq!(ctx.allocator().reservations().len(), 2);

    drop(placed);
    assert!(ctx.allocator().reservations().is_empty());
}

#[test]
#[should_panic(
    expected = r#"transferred to 0x82000000 after ["flush_dcache", "invalidate_icache", "shutdown", "disable_interrupts"]"#
)]
fn booting_quiesces_then_jumps() {
    let banks = common::banks();
    let mut ram = SimulatedRam::new(banks.clone());
    let mut ctx = common::context(&banks, &mut ram);
    let mut platform = MockPlatform::default();

    let desc = BootDescriptor::new(ImageLocator::buffer("zImage", common::zimage(4096)));
    let _ = unsafe { bootm::bootm(&mut ctx, &desc, &mut platform) };
    unreachable!("bootm returned");
}

#[test]
fn failed_boot_returns_the_error_without_quiescing() {
    let banks = common::banks();
    let mut ram = SimulatedRam::new(banks.clone());
    let mut ctx = common::context(&banks, &mut ram);
    let mut platform = MockPlatform::default();

    let desc = BootDescriptor::new(ImageLocator::buffer("junk", vec![0u8; 4096]));
    let err = unsafe { bootm::bootm(&mut ctx, &desc, &mut platform) }.unwrap_err();
    assert!(matches!(err, BootError::UnrecognizedFormat(FileType::Unknown)));
    assert!(platform.calls.is_empty());
}

#[test]
fn swapped_zimage_is_stored_in_native_order() {
    let banks = common::banks();
    let mut ram = SimulatedRam::new(banks.clone());
    let mut ctx = common::context(&banks, &mut ram);

    let desc = BootDescriptor::new(ImageLocator::buffer("zImage", common::swapped_zimage(8192)));
    let image = ctx.load(&desc).unwrap();
    assert_eq!(image.primary().size(), 8192);
    assert_eq!(read(&mut ctx, image.primary().start(), 8192), common::zimage(8192));
}

#[test]
fn truncated_image_releases_its_region() {
    let banks = common::banks();
    let mut ram = SimulatedRam::new(banks.clone());
    let mut ctx = common::context(&banks, &mut ram);

    let mut kernel = common::zimage(8192);
    kernel.truncate(4096);
    let desc = BootDescriptor::new(ImageLocator::buffer("zImage", kernel));
    let err = ctx.load(&desc).unwrap_err();

    assert!(matches!(err, BootError::ShortRead { .. }), "{err}");
    assert!(ctx.allocator().reservations().is_empty());
}

#[test]
fn resident_image_runs_in_place() {
    let banks = common::banks();
    let mut ram = SimulatedRam::new(banks.clone());
    let at = PhysicalAddress::new(RAM_BASE + 0x10_0000);
    ram.write(at, &common::zimage(4096)).unwrap();
    let mut ctx = common::context(&banks, &mut ram);

    let desc = BootDescriptor::new(ImageLocator::Resident { addr: at, len: 4096 });
    let image = ctx.load(&desc).unwrap();

    assert_eq!(image.primary().start(), at);
    assert_eq!(image.entry(), at);
}

#[test]
fn resident_image_outside_the_window_is_copied() {
    let banks = common::banks();
    let mut ram = SimulatedRam::new(banks.clone());
    let at = PhysicalAddress::new(RAM_BASE + 0x10_0000);
    ram.write(at, &common::zimage(4096)).unwrap();
    let config = bootm::LoaderConfig::default().with_in_place_window(0x8_0000);
    let mut ctx = common::context_with(&banks, &mut ram, config);

    let desc = BootDescriptor::new(ImageLocator::Resident { addr: at, len: 4096 });
    let image = ctx.load(&desc).unwrap();

    assert_eq!(image.primary().start().as_u64(), RAM_BASE + MARGIN);
    assert_eq!(read(&mut ctx, image.primary().start(), 4096), common::zimage(4096));
}

#[test]
fn resident_length_beyond_the_banks_is_rejected_before_reading() {
    let banks = common::banks();
    let mut ram = SimulatedRam::new(banks.clone());
    let mut ctx = common::context(&banks, &mut ram);

    let at = PhysicalAddress::new(RAM_BASE);
    let desc = BootDescriptor::new(ImageLocator::Resident { addr: at, len: 1 << 62 });
    let err = ctx.load(&desc).unwrap_err();

    assert!(
        matches!(err, BootError::RegionConflict(RegionError::OutsideBanks { .. })),
        "{err}"
    );
    assert!(ctx.allocator().reservations().is_empty());

    let wrapping = ImageLocator::Resident {
        addr: PhysicalAddress::new(u64::MAX - 0x10),
        len: 0x100,
    };
    let err = ctx.load(&BootDescriptor::new(wrapping)).unwrap_err();
    assert!(
        matches!(err, BootError::RegionConflict(RegionError::Overflow { .. })),
        "{err}"
    );
}

#[test]
fn appended_device_tree_is_placed_behind_the_kernel() {
    let banks = common::banks();
    let mut ram = SimulatedRam::new(banks.clone());
    let mut ctx = common::context(&banks, &mut ram);

    let dtb = common::fdt(256);
    let mut blob = common::zimage(4096);
    blob.extend_from_slice(&dtb);
    let desc = BootDescriptor::new(ImageLocator::buffer("zImage", blob))
        .with_oftree(ImageLocator::buffer("ignored.dtb", common::fdt(512)))
        .with_dry_run(true);
    let image = ctx.load(&desc).unwrap();

    assert_eq!(image.primary().size(), 4096);
    let tree = image.component(ComponentKind::DeviceTree).unwrap();
    assert_eq!(tree.start().as_u64(), RAM_BASE + MARGIN + 0x1000);
    assert_eq!(tree.size(), 256);
    assert_eq!(read(&mut ctx, tree.start(), 256), dtb);

    let placed = bootm::PlacedImage::new(image, ctx.config().convention);
    let argv = placed.argument_vector();
    assert_eq!(argv.words, [0, 0xFFFF_FFFF, RAM_BASE + MARGIN + 0x1000, 0]);
}

#[test]
fn extras_are_stacked_above_the_kernel() {
    let banks = common::banks();
    let mut ram = SimulatedRam::new(banks.clone());
    let mut ctx = common::context(&banks, &mut ram);

    let initrd = common::pattern(10_000, 9);
    let mut dtb_file = common::fdt(256);
    dtb_file.extend_from_slice(&[0xEE; 44]);
    let tee_addr = RAM_BASE + (48 << 20);
    let tee_payload = common::pattern(4096, 5);

    let desc = BootDescriptor::new(ImageLocator::buffer("zImage", common::zimage(4096)))
        .with_initrd(ImageLocator::buffer("initrd", initrd.clone()))
        .with_oftree(ImageLocator::buffer("board.dtb", dtb_file))
        .with_tee(ImageLocator::buffer("tee.bin", common::optee(tee_addr, &tee_payload)));
    let image = ctx.load(&desc).unwrap();

    let kernel_end = RAM_BASE + MARGIN + 0x1000;
    let ramdisk = image.component(ComponentKind::Ramdisk).unwrap();
    assert_eq!(ramdisk.start().as_u64(), kernel_end);
    assert_eq!(ramdisk.size(), 10_000);
    assert_eq!(read(&mut ctx, ramdisk.start(), 10_000), initrd);

    let tree = image.component(ComponentKind::DeviceTree).unwrap();
    assert_eq!(tree.start().as_u64(), kernel_end + 0x3000);
    assert_eq!(tree.size(), 256);

    let tee = image.component(ComponentKind::Firmware).unwrap();
    assert_eq!(tee.start().as_u64(), tee_addr);
    assert_eq!(read(&mut ctx, tee.start(), 4096), tee_payload);

    let argv = bootm::ArgumentVector::build(ctx.config().convention, &image);
    assert_eq!(argv.words, [0, 0xFFFF_FFFF, kernel_end + 0x3000, tee_addr]);
}

#[test]
fn pinned_ramdisk_on_top_of_the_kernel_is_rejected() {
    let banks = common::banks();
    let mut ram = SimulatedRam::new(banks.clone());
    let mut ctx = common::context(&banks, &mut ram);

    let desc = BootDescriptor::new(ImageLocator::buffer("zImage", common::zimage(4096)))
        .with_initrd(ImageLocator::buffer("initrd", vec![1; 100]))
        .with_initrd_address(RAM_BASE + MARGIN + 0x800);
    let err = ctx.load(&desc).unwrap_err();

    match err {
        BootError::RegionConflict(RegionError::Busy { existing_name, .. }) => {
            assert_eq!(existing_name, "zImage");
        }
        other => panic!("unexpected error {other}"),
    }
    assert!(ctx.allocator().reservations().is_empty());
}

#[test]
fn bad_device_tree_is_rejected() {
    let banks = common::banks();
    let mut ram = SimulatedRam::new(banks.clone());
    let mut ctx = common::context(&banks, &mut ram);

    let mut short = common::fdt(256);
    short.truncate(200);
    for (name, tree) in [("short.dtb", short), ("zero.dtb", vec![0u8; 64])] {
        let desc = BootDescriptor::new(ImageLocator::buffer("zImage", common::zimage(4096)))
            .with_oftree(ImageLocator::buffer(name, tree));
        assert!(ctx.load(&desc).is_err(), "{name}");
        assert!(ctx.allocator().reservations().is_empty());
    }
}

#[test]
fn empty_ramdisk_is_rejected() {
    let banks = common::banks();
    let mut ram = SimulatedRam::new(banks.clone());
    let mut ctx = common::context(&banks, &mut ram);

    let desc = BootDescriptor::new(ImageLocator::buffer("zImage", common::zimage(4096)))
        .with_initrd(ImageLocator::buffer("initrd", Vec::new()));
    assert!(matches!(
        ctx.load(&desc),
        Err(BootError::InvalidDescriptor(_))
    ));
}

#[test]
fn image_files_are_read_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("zImage");
    std::fs::write(&path, common::zimage(8192)).unwrap();

    let banks = common::banks();
    let mut ram = SimulatedRam::new(banks.clone());
    let mut ctx = common::context(&banks, &mut ram);

    let image = ctx.load(&BootDescriptor::new(ImageLocator::path(&path))).unwrap();
    assert_eq!(image.primary().size(), 8192);

    let missing = BootDescriptor::new(ImageLocator::path(dir.path().join("missing")));
    assert!(matches!(ctx.load(&missing), Err(BootError::Io { .. })));
}

proptest! {
    #[test]
    fn live_regions_never_overlap(
        requests in prop::collection::vec((any::<bool>(), 0u64..0x400_0000, 1u64..0x10_0000), 1..40)
    ) {
        let allocator = RegionAllocator::new(common::banks(), MARGIN);
        let mut live = Vec::new();
        for (i, (pinned, offset, size)) in requests.into_iter().enumerate() {
            let name = format!("r{i}");
            let result = if pinned {
                allocator.reserve(&name, PhysicalAddress::new(RAM_BASE + offset), size)
            } else {
                allocator.reserve_lowest(&name, size, PhysicalAddress::zero())
            };
            if let Ok(region) = result {
                live.push(region);
            }
        }

        let bank = PhysRange::new(PhysicalAddress::new(RAM_BASE), common::RAM_SIZE).unwrap();
        for (i, a) in live.iter().enumerate() {
            prop_assert!(bank.contains_range(&a.range()));
            for b in &live[i + 1..] {
                prop_assert!(
                    !a.range().overlaps(&b.range()),
                    "{} overlaps {}",
                    a.range(),
                    b.range()
                );
            }
        }
        prop_assert_eq!(allocator.reservations().len(), live.len());
    }
}
