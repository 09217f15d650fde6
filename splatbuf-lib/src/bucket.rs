use foldhash::{HashMap, HashMapExt};
use glam::Vec3;

/// One cell-sized group of splats. `splats` holds indices into the list the
/// builder was given; `center` is the cell center the level-1 quantizer
/// encodes against.
#[derive(Clone, Debug)]
pub struct Bucket {
    pub splats: Vec<u32>,
    pub center: [f32; 3],
}

#[derive(Debug, Default)]
pub struct BucketPartition {
    pub full: Vec<Bucket>,
    pub partial: Vec<Bucket>,
}

impl BucketPartition {
    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.full.len() + self.partial.len()
    }

    /// Buckets in section order: full buckets first, then partial.
    pub fn iter(&self) -> impl Iterator<Item = &Bucket> {
        self.full.iter().chain(self.partial.iter())
    }
}

/// Partition splats into grid cells of side `block_size`, at most
/// `bucket_size` splats per bucket. A cell that overflows spills into a fresh
/// bucket under the same key. Splats sitting exactly on the upper bounds face
/// land one cell past the nominal grid span; the quantization clamp keeps
/// that harmless.
pub fn build_buckets(centers: &[Vec3], block_size: f32, bucket_size: u32) -> BucketPartition {
    let mut out = BucketPartition::default();
    if centers.is_empty() {
        return out;
    }

    let mut min = centers[0];
    let mut max = centers[0];
    for &c in &centers[1..] {
        min = min.min(c);
        max = max.max(c);
    }
    let dim = max - min;
    let y_blocks = (dim.y / block_size).ceil() as u64;
    let z_blocks = (dim.z / block_size).ceil() as u64;

    let mut open: Vec<Bucket> = Vec::new();
    let mut slot_by_key: HashMap<u64, usize> = HashMap::new();

    for (i, &c) in centers.iter().enumerate() {
        let rel = c - min;
        let xb = (rel.x / block_size).floor() as u64;
        let yb = (rel.y / block_size).floor() as u64;
        let zb = (rel.z / block_size).floor() as u64;
        let key = xb * y_blocks * z_blocks + yb * z_blocks + zb;

        let slot = match slot_by_key.get(&key) {
            Some(&slot) => slot,
            None => {
                let center = [
                    xb as f32 * block_size + min.x + block_size / 2.0,
                    yb as f32 * block_size + min.y + block_size / 2.0,
                    zb as f32 * block_size + min.z + block_size / 2.0,
                ];
                open.push(Bucket {
                    splats: Vec::new(),
                    center,
                });
                slot_by_key.insert(key, open.len() - 1);
                open.len() - 1
            }
        };

        open[slot].splats.push(i as u32);
        if open[slot].splats.len() == bucket_size as usize {
            let center = open[slot].center;
            out.full.push(std::mem::replace(
                &mut open[slot],
                Bucket {
                    splats: Vec::new(),
                    center,
                },
            ));
        }
    }

    out.partial = open.into_iter().filter(|b| !b.splats.is_empty()).collect();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coverage(partition: &BucketPartition, count: usize) {
        let mut seen = vec![false; count];
        for bucket in partition.iter() {
            for &i in &bucket.splats {
                assert!(!seen[i as usize], "splat {} appears twice", i);
                seen[i as usize] = true;
            }
        }
        assert!(seen.iter().all(|&s| s), "not every splat was bucketed");
    }

    #[test]
    fn test_single_cell() {
        let centers = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 1.0, 1.0),
            Vec3::new(0.5, 0.2, 0.9),
        ];
        let partition = build_buckets(&centers, 5.0, 256);
        assert_eq!(partition.full.len(), 0);
        assert_eq!(partition.partial.len(), 1);
        assert_eq!(partition.partial[0].splats.len(), 3);
        coverage(&partition, 3);
    }

    #[test]
    fn test_overflowing_cell_produces_full_buckets() {
        let centers: Vec<Vec3> = (0..600)
            .map(|i| Vec3::new(0.0, 0.0, i as f32 * 0.001))
            .collect();
        let partition = build_buckets(&centers, 5.0, 256);
        assert_eq!(partition.full.len(), 2);
        assert_eq!(partition.partial.len(), 1);
        for bucket in &partition.full {
            assert_eq!(bucket.splats.len(), 256);
        }
        assert_eq!(partition.partial[0].splats.len(), 600 - 512);
        coverage(&partition, 600);
    }

    #[test]
    fn test_grid_spread() {
        // 4 well separated cells along x, plus one point on the far face.
        let mut centers = Vec::new();
        for cell in 0..4 {
            for i in 0..10 {
                centers.push(Vec3::new(cell as f32 * 5.0 + i as f32 * 0.1, 0.0, 0.0));
            }
        }
        let partition = build_buckets(&centers, 5.0, 256);
        assert_eq!(partition.full.len(), 0);
        assert!(partition.partial.len() >= 4);
        coverage(&partition, centers.len());

        // Each splat sits inside half a block of its bucket center on y/z and
        // within the clampable range on x.
        for bucket in partition.iter() {
            for &i in &bucket.splats {
                let c = centers[i as usize];
                assert!((c.y - bucket.center[1]).abs() <= 2.5 + 1e-4);
                assert!((c.z - bucket.center[2]).abs() <= 2.5 + 1e-4);
            }
        }
    }

    #[test]
    fn test_bucket_centers_lie_on_grid() {
        let centers = vec![Vec3::new(-1.0, -2.0, -3.0), Vec3::new(1.0, 2.0, 3.0)];
        let partition = build_buckets(&centers, 5.0, 256);
        for bucket in partition.iter() {
            for axis in 0..3 {
                let rel = bucket.center[axis] - (-(axis as f32 + 1.0)) - 2.5;
                assert!((rel / 5.0).fract().abs() < 1e-6);
            }
        }
        coverage(&partition, 2);
    }
}
