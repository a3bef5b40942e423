//! Read-through caching over a simulated block device.
//!
//! Run with: `cargo run --example read_through`

use core::num::NonZeroUsize;
use std::sync::Mutex;

use objcache_rs::{CacheMetrics, MediaBackend, ObjectCache, ObjectCacheConfig};

const SECTOR_SIZE: usize = 64;
const SECTORS: usize = 256;

/// An in-memory "disk": one group, `SECTORS` sectors, slow by decree.
struct RamDisk {
    sectors: Mutex<Vec<[u8; SECTOR_SIZE]>>,
}

impl RamDisk {
    fn new() -> Self {
        let sectors = (0..SECTORS)
            .map(|i| [i as u8; SECTOR_SIZE])
            .collect();
        RamDisk {
            sectors: Mutex::new(sectors),
        }
    }
}

impl MediaBackend for RamDisk {
    type Error = String;

    fn read(&self, _group: u32, key: u32, buf: &mut [u8]) -> Result<(), String> {
        let sectors = self.sectors.lock().unwrap();
        let sector = sectors
            .get(key as usize)
            .ok_or_else(|| format!("sector {} out of range", key))?;
        buf.copy_from_slice(sector);
        Ok(())
    }

    fn write(&self, _group: u32, key: u32, buf: &[u8]) -> Result<(), String> {
        let mut sectors = self.sectors.lock().unwrap();
        let sector = sectors
            .get_mut(key as usize)
            .ok_or_else(|| format!("sector {} out of range", key))?;
        sector.copy_from_slice(buf);
        Ok(())
    }
}

fn main() {
    let cache = ObjectCache::init(
        ObjectCacheConfig {
            hash_slots: 32,
            objects: NonZeroUsize::new(16).unwrap(),
            buffer_size: SECTOR_SIZE,
        },
        RamDisk::new(),
        None,
    );

    // A skewed access pattern: a few hot sectors, a long cold tail.
    let accesses: Vec<u32> = (0..400)
        .map(|i| if i % 4 == 0 { i as u32 % 200 } else { i as u32 % 8 })
        .collect();

    for &sector in &accesses {
        let lease = cache.read_through(0, sector).expect("disk read failed");
        assert_eq!(lease.data()[0], sector as u8);
        lease.release();
    }

    // Rewrite one hot sector through the cache.
    let mut lease = cache.read_through(0, 3).expect("disk read failed");
    lease.data_mut().fill(0xEE);
    lease.set_modified();
    lease.write_back().expect("disk write failed");
    lease.release();

    println!("{} accesses against a {}-buffer cache", accesses.len() + 1, cache.object_count());
    for (name, value) in cache.metrics() {
        println!("  {:<24} {:>10.3}", name, value);
    }
}
