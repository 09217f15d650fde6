pub mod bucket;
pub mod common;
pub mod error;
pub mod reader;
pub mod splat_array;
pub mod structures;
pub mod transform;
pub mod writer;

pub use error::SplatBufError;
pub use reader::{FloatsMut, Section, SplatBuffer};
pub use splat_array::{splat, SplatArray};
pub use structures::{Header, SectionHeader, SplatLayout};
pub use transform::ShRotation;
pub use writer::{write_splat_buffer, SectionParams, WriterOptions};

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Affine3A, Quat, Vec3};

    // Three splats with distinct colors so read-back order can be identified
    // after level-1 bucket reordering.
    fn three_splat_array() -> SplatArray {
        let mut array = SplatArray::new(0).unwrap();
        array
            .push(
                [0.0, 0.0, 0.0],
                Some([1.0, 1.0, 1.0]),
                Some([0.0, 0.0, 0.0, 1.0]),
                Some([255, 0, 0]),
                Some(255),
                &[],
            )
            .unwrap();
        array
            .push(
                [1.0, 2.0, 3.0],
                Some([1.0, 1.0, 1.0]),
                Some([0.0, 0.0, 0.0, 1.0]),
                Some([0, 255, 0]),
                Some(128),
                &[],
            )
            .unwrap();
        array
            .push(
                [-1.0, -2.0, -3.0],
                Some([1.0, 1.0, 1.0]),
                Some([0.0, 0.0, 0.0, 1.0]),
                Some([0, 0, 255]),
                Some(64),
                &[],
            )
            .unwrap();
        array
    }

    fn source_index_by_color(color: [u8; 4]) -> usize {
        match color {
            [255, 0, 0, 255] => 0,
            [0, 255, 0, 128] => 1,
            [0, 0, 255, 64] => 2,
            other => panic!("unexpected color {:?}", other),
        }
    }

    #[test]
    fn test_level0_write_read_identity() {
        let array = three_splat_array();
        let buffer = write_splat_buffer(&[array], &WriterOptions::default()).unwrap();

        assert_eq!(buffer.splat_count(), 3);
        assert_eq!(buffer.section_count(), 1);
        assert_eq!(buffer.layout().bytes_per_splat, 44);

        let expected_centers = [[0.0, 0.0, 0.0], [1.0, 2.0, 3.0], [-1.0, -2.0, -3.0]];
        for g in 0..3 {
            let src = source_index_by_color(buffer.splat_color(g));
            assert_eq!(src, g, "level 0 preserves input order");
            assert_eq!(buffer.splat_center(g), expected_centers[src]);
            assert_eq!(buffer.splat_scale(g), [1.0, 1.0, 1.0]);
            assert_eq!(buffer.splat_rotation(g), [0.0, 0.0, 0.0, 1.0]);
        }
        buffer.validate().unwrap();
    }

    #[test]
    fn test_level1_quantization_bound() {
        let array = three_splat_array();
        let options = WriterOptions {
            compression_level: 1,
            ..WriterOptions::default()
        };
        let buffer = write_splat_buffer(&[array], &options).unwrap();
        assert_eq!(buffer.splat_count(), 3);
        buffer.validate().unwrap();

        let expected_centers = [[0.0, 0.0, 0.0], [1.0, 2.0, 3.0], [-1.0, -2.0, -3.0]];
        // One quantization step: blockSize / (2 * scaleRange).
        let bound = 5.0 / (2.0 * 32767.0) + 1e-6;
        let mut seen = [false; 3];
        for g in 0..3 {
            let src = source_index_by_color(buffer.splat_color(g));
            assert!(!seen[src]);
            seen[src] = true;
            let center = buffer.splat_center(g);
            for axis in 0..3 {
                let err = (center[axis] - expected_centers[src][axis]).abs();
                assert!(err <= bound, "axis {} error {} > {}", axis, err, bound);
            }
            // Half-float survivors: 1.0 and the unit quaternion are exact.
            assert_eq!(buffer.splat_scale(g), [1.0, 1.0, 1.0]);
            assert_eq!(buffer.splat_rotation(g), [0.0, 0.0, 0.0, 1.0]);
        }
    }

    #[test]
    fn test_two_sections_with_full_buckets() {
        let mut dense = SplatArray::new(1).unwrap();
        for i in 0..300 {
            let t = i as f32 * 0.01;
            dense
                .push(
                    [t.sin(), t.cos(), t * 0.001],
                    Some([0.1, 0.1, 0.1]),
                    None,
                    Some([10, 20, 30]),
                    Some(255),
                    &[0.25; 9],
                )
                .unwrap();
        }
        let mut sparse = SplatArray::new(1).unwrap();
        for i in 0..50 {
            sparse
                .push(
                    [i as f32 * 0.2, (i % 7) as f32, -(i as f32) * 0.2],
                    Some([0.1, 0.1, 0.1]),
                    None,
                    Some([40, 50, 60]),
                    Some(255),
                    &[-0.5; 9],
                )
                .unwrap();
        }

        let options = WriterOptions {
            compression_level: 1,
            ..WriterOptions::default()
        };
        let buffer = write_splat_buffer(&[dense, sparse], &options).unwrap();

        assert_eq!(buffer.section_count(), 2);
        assert_eq!(buffer.splat_count(), 350);
        // 300 splats within a 2x2x0.3 region all share one grid cell.
        let first = &buffer.sections()[0];
        assert_eq!(first.header.full_bucket_count, 1);
        assert_eq!(first.header.partially_filled_bucket_count, 1);
        assert_eq!(buffer.sections()[1].splat_count_offset, 300);
        buffer.validate().unwrap();

        for g in 0..350 {
            let color = buffer.splat_color(g);
            if g < 300 {
                assert_eq!(color, [10, 20, 30, 255]);
            } else {
                assert_eq!(color, [40, 50, 60, 255]);
            }
        }

        // Level-1 SH pass-through stays within the stored half precision.
        let mut sh = vec![0u16; 9];
        buffer.fill_spherical_harmonics(&mut FloatsMut::F16(&mut sh), 1, None, 10, 10, 0);
        for &bits in &sh {
            assert_eq!(bits, half::f16::from_f32(0.25).to_bits());
        }
    }

    #[test]
    fn test_sh_rotation_about_z() {
        let mut array = SplatArray::new(1).unwrap();
        let mut sh = [0.0f32; 9];
        sh[0] = 1.0; // R channel, first band-1 coefficient
        array
            .push([0.0; 3], Some([1.0; 3]), None, Some([255, 255, 255]), Some(255), &sh)
            .unwrap();
        let buffer = write_splat_buffer(&[array], &WriterOptions::default()).unwrap();

        let transform = Affine3A::from_quat(Quat::from_rotation_z(std::f32::consts::FRAC_PI_2));
        let mut out = [0.0f32; 9];
        buffer.fill_spherical_harmonics(&mut FloatsMut::F32(&mut out), 1, Some(&transform), 0, 0, 0);

        assert!(out[0].abs() < 1e-6);
        assert!(out[1].abs() < 1e-6);
        assert!((out[2] - 1.0).abs() < 1e-6);
        assert!(out[3..].iter().all(|&v| v.abs() < 1e-6));
    }

    #[test]
    fn test_sh_identity_transform_is_exact() {
        let mut array = SplatArray::new(2).unwrap();
        let sh: Vec<f32> = (0..24).map(|i| (i as f32 - 11.5) * 0.125).collect();
        array
            .push([0.5, 0.5, 0.5], Some([1.0; 3]), None, None, None, &sh)
            .unwrap();
        let buffer = write_splat_buffer(&[array], &WriterOptions::default()).unwrap();

        let mut plain = [0.0f32; 24];
        buffer.fill_spherical_harmonics(&mut FloatsMut::F32(&mut plain), 2, None, 0, 0, 0);
        assert_eq!(&plain[..], &sh[..]);

        let mut rotated = [0.0f32; 24];
        buffer.fill_spherical_harmonics(
            &mut FloatsMut::F32(&mut rotated),
            2,
            Some(&Affine3A::IDENTITY),
            0,
            0,
            0,
        );
        assert_eq!(rotated, plain);

        // Degree clamp: asking for degree 1 yields the 9-component prefix.
        let mut low = [0.0f32; 9];
        buffer.fill_spherical_harmonics(&mut FloatsMut::F32(&mut low), 1, None, 0, 0, 0);
        assert_eq!(&low[..], &sh[..9]);
    }

    #[test]
    fn test_opacity_filter_on_write() {
        let mut array = SplatArray::new(0).unwrap();
        array
            .push([0.0; 3], None, None, Some([1, 2, 3]), Some(10), &[])
            .unwrap();
        array
            .push([1.0; 3], None, None, Some([4, 5, 6]), Some(200), &[])
            .unwrap();

        let dropping = WriterOptions {
            minimum_alpha: 16,
            ..WriterOptions::default()
        };
        let buffer = write_splat_buffer(&[array.clone()], &dropping).unwrap();
        assert_eq!(buffer.splat_count(), 1);
        assert_eq!(buffer.splat_color(0), [4, 5, 6, 200]);

        let keeping = WriterOptions {
            minimum_alpha: 0,
            ..WriterOptions::default()
        };
        let buffer = write_splat_buffer(&[array], &keeping).unwrap();
        assert_eq!(buffer.splat_count(), 2);
        assert_eq!(buffer.splat_color(0)[3], 10);
    }

    #[test]
    fn test_fill_colors_alpha_gate() {
        let array = three_splat_array();
        let buffer = write_splat_buffer(&[array], &WriterOptions::default()).unwrap();

        let mut out = [0u8; 12];
        buffer.fill_colors(&mut out, 100, 0, 2, 0);
        assert_eq!(&out[0..4], &[255, 0, 0, 255]);
        assert_eq!(&out[4..8], &[0, 255, 0, 128]);
        // Alpha 64 falls below the gate; RGB survives.
        assert_eq!(&out[8..12], &[0, 0, 255, 0]);
        for chunk in out.chunks(4) {
            assert!(chunk[3] == 0 || chunk[3] >= 100);
        }
        // Source bytes are untouched.
        assert_eq!(buffer.splat_color(2)[3], 64);
    }

    #[test]
    fn test_fill_centers_with_transform() {
        let array = three_splat_array();
        let buffer = write_splat_buffer(&[array], &WriterOptions::default()).unwrap();
        let transform = Affine3A::from_translation(Vec3::new(10.0, 20.0, 30.0));
        let mut out = [0.0f32; 9];
        buffer.fill_centers(&mut out, Some(&transform), 0, 2, 0);
        assert_eq!(&out[0..3], &[10.0, 20.0, 30.0]);
        assert_eq!(&out[3..6], &[11.0, 22.0, 33.0]);
        assert_eq!(&out[6..9], &[9.0, 18.0, 27.0]);
    }

    #[test]
    fn test_fill_covariances() {
        let mut array = SplatArray::new(0).unwrap();
        array
            .push(
                [0.0; 3],
                Some([1.0, 2.0, 3.0]),
                Some([0.0, 0.0, 0.0, 1.0]),
                None,
                None,
                &[],
            )
            .unwrap();
        let buffer = write_splat_buffer(&[array], &WriterOptions::default()).unwrap();

        let mut cov = [0.0f32; 6];
        buffer.fill_covariances(&mut FloatsMut::F32(&mut cov), None, 0, 0, 0);
        assert_eq!(cov, [1.0, 0.0, 0.0, 4.0, 0.0, 9.0]);

        // Same values survive a half-float sink; 1, 4, 9 are representable.
        let mut halves = [0u16; 6];
        buffer.fill_covariances(&mut FloatsMut::F16(&mut halves), None, 0, 0, 0);
        assert_eq!(half::f16::from_bits(halves[0]).to_f32(), 1.0);
        assert_eq!(half::f16::from_bits(halves[3]).to_f32(), 4.0);
        assert_eq!(half::f16::from_bits(halves[5]).to_f32(), 9.0);
    }

    #[test]
    fn test_update_loaded_counts_and_reparse() {
        let mut array = SplatArray::new(0).unwrap();
        for i in 0..10 {
            array
                .push([i as f32, 0.0, 0.0], None, None, None, None, &[])
                .unwrap();
        }
        let mut buffer = write_splat_buffer(&[array], &WriterOptions::default()).unwrap();
        let before = buffer.data().to_vec();

        buffer.update_loaded_counts(1, 7).unwrap();
        assert_eq!(buffer.splat_count(), 7);

        let reparsed = SplatBuffer::parse(buffer.data().to_vec()).unwrap();
        assert_eq!(reparsed.section_count(), 1);
        assert_eq!(reparsed.splat_count(), 7);

        // Only the two counter words changed.
        let after = buffer.data();
        assert_eq!(before.len(), after.len());
        for (i, (&a, &b)) in before.iter().zip(after.iter()).enumerate() {
            if a != b {
                assert!(i >= 16 && i < 20, "unexpected change at byte {}", i);
            }
        }

        assert!(buffer.update_loaded_counts(1, 11).is_err());
        assert!(buffer.update_loaded_counts(2, 7).is_err());
    }

    #[test]
    fn test_update_section_splat_count() {
        let mut array = SplatArray::new(0).unwrap();
        for i in 0..5 {
            array
                .push([i as f32, 0.0, 0.0], None, None, None, None, &[])
                .unwrap();
        }
        let mut buffer = write_splat_buffer(&[array], &WriterOptions::default()).unwrap();
        buffer.update_section_splat_count(0, 3).unwrap();
        assert_eq!(buffer.sections()[0].header.splat_count, 3);
        assert!(buffer.update_section_splat_count(0, 6).is_err());
        assert!(buffer.update_section_splat_count(1, 1).is_err());
    }

    #[test]
    fn test_mixed_sh_degrees_rejected() {
        let a = SplatArray::new(0).unwrap();
        let b = SplatArray::new(1).unwrap();
        match write_splat_buffer(&[a, b], &WriterOptions::default()) {
            Err(SplatBufError::MixedShDegrees(_)) => {}
            other => panic!("expected MixedShDegrees, got {:?}", other.map(|_| ())),
        }
        assert!(matches!(
            write_splat_buffer(&[], &WriterOptions::default()),
            Err(SplatBufError::EmptyWrite)
        ));
    }

    #[test]
    fn test_parse_rejects_bad_buffers() {
        let array = three_splat_array();
        let buffer = write_splat_buffer(&[array], &WriterOptions::default()).unwrap();
        let good = buffer.into_data();

        let mut newer = good.clone();
        newer[0] = 1;
        assert!(matches!(
            SplatBuffer::parse(newer),
            Err(SplatBufError::UnsupportedVersion(_))
        ));

        let mut bad_level = good.clone();
        bad_level[20] = 5;
        assert!(matches!(
            SplatBuffer::parse(bad_level),
            Err(SplatBufError::InvalidCompressionLevel(5))
        ));

        let mut truncated = good.clone();
        truncated.truncate(good.len() - 16);
        assert!(matches!(
            SplatBuffer::parse(truncated),
            Err(SplatBufError::CorruptBuffer(_))
        ));

        assert!(SplatBuffer::parse(good).is_ok());
    }
}
