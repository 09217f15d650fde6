use glam::Vec3;

use crate::bucket::build_buckets;
use crate::common::{clamp_u8, float_to_half, normalize_quat, write_f32, write_u16, write_u32};
use crate::error::SplatBufError;
use crate::reader::SplatBuffer;
use crate::splat_array::{splat, SplatArray};
use crate::structures::{
    Header, SectionHeader, SplatLayout, CURRENT_MAJOR_VERSION, CURRENT_MINOR_VERSION,
    DEFAULT_BLOCK_SIZE, DEFAULT_BUCKET_SIZE, HEADER_BYTES, LEVEL_1_BUCKET_STORAGE_BYTES,
    SECTION_HEADER_BYTES,
};

/// Per-section multipliers applied to the writer-wide block and bucket sizes.
#[derive(Clone, Copy, Debug)]
pub struct SectionParams {
    pub block_size_factor: f32,
    pub bucket_size_factor: f32,
}

impl Default for SectionParams {
    fn default() -> Self {
        Self {
            block_size_factor: 1.0,
            bucket_size_factor: 1.0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct WriterOptions {
    pub compression_level: u16,
    pub minimum_alpha: u8,
    pub scene_center: [f32; 3],
    pub block_size: f32,
    pub bucket_size: u32,
    /// Indexed per input array; missing entries fall back to the defaults.
    pub section_params: Vec<SectionParams>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            compression_level: 0,
            minimum_alpha: 1,
            scene_center: [0.0; 3],
            block_size: DEFAULT_BLOCK_SIZE,
            bucket_size: DEFAULT_BUCKET_SIZE,
            section_params: Vec::new(),
        }
    }
}

/// Assemble a splat buffer from uncompressed arrays, one section per array.
/// All arrays must share one SH degree.
pub fn write_splat_buffer(
    arrays: &[SplatArray],
    options: &WriterOptions,
) -> Result<SplatBuffer, SplatBufError> {
    if arrays.is_empty() {
        return Err(SplatBufError::EmptyWrite);
    }
    let sh_degree = arrays[0].sh_degree();
    for (i, array) in arrays.iter().enumerate().skip(1) {
        if array.sh_degree() != sh_degree {
            return Err(SplatBufError::MixedShDegrees(format!(
                "array {} has degree {}, the first array has degree {}",
                i,
                array.sh_degree(),
                sh_degree
            )));
        }
    }
    let layout = SplatLayout::new(options.compression_level, sh_degree)?;

    let mut sections = Vec::with_capacity(arrays.len());
    for (i, array) in arrays.iter().enumerate() {
        let params = options.section_params.get(i).copied().unwrap_or_default();
        sections.push(build_section(array, &layout, options, &params));
    }

    let section_count = sections.len() as u32;
    let total_splats: u32 = sections.iter().map(|(h, _)| h.splat_count).sum();
    let payload_bytes: usize = sections.iter().map(|(_, payload)| payload.len()).sum();

    let headers_end = HEADER_BYTES + sections.len() * SECTION_HEADER_BYTES;
    let mut data = vec![0u8; headers_end + payload_bytes];

    let header = Header {
        version_major: CURRENT_MAJOR_VERSION,
        version_minor: CURRENT_MINOR_VERSION,
        max_section_count: section_count,
        section_count,
        max_splat_count: total_splats,
        splat_count: total_splats,
        compression_level: options.compression_level,
        scene_center: options.scene_center,
        sh_degree,
    };
    header.write_into(&mut data[..HEADER_BYTES]);

    let mut offset = headers_end;
    for (i, (section_header, payload)) in sections.iter().enumerate() {
        let base = HEADER_BYTES + i * SECTION_HEADER_BYTES;
        section_header.write_into(&mut data[base..base + SECTION_HEADER_BYTES]);
        data[offset..offset + payload.len()].copy_from_slice(payload);
        offset += payload.len();
    }

    SplatBuffer::parse(data)
}

fn build_section(
    array: &SplatArray,
    layout: &SplatLayout,
    options: &WriterOptions,
    params: &SectionParams,
) -> (SectionHeader, Vec<u8>) {
    let min_alpha = options.minimum_alpha as f32;
    let kept: Vec<usize> =
        (0..array.len()).filter(|&i| array.get(i)[splat::OPACITY] >= min_alpha).collect();
    let splat_count = kept.len() as u32;

    if layout.compression_level == 0 {
        let mut payload = vec![0u8; kept.len() * layout.bytes_per_splat];
        for (out_index, &src) in kept.iter().enumerate() {
            let base = out_index * layout.bytes_per_splat;
            write_splat(&mut payload[base..], layout, array.get(src), None);
        }
        let header = SectionHeader {
            splat_count,
            max_splat_count: splat_count,
            bucket_size: 0,
            bucket_count: 0,
            bucket_block_size: 0.0,
            bucket_storage_size_bytes: 0,
            compression_scale_range: 0,
            storage_size_bytes: payload.len() as u32,
            full_bucket_count: 0,
            partially_filled_bucket_count: 0,
        };
        return (header, payload);
    }

    let block_size = options.block_size * params.block_size_factor;
    let bucket_size =
        ((options.bucket_size as f32 * params.bucket_size_factor) as u32).max(1);

    let centers: Vec<Vec3> = kept
        .iter()
        .map(|&i| {
            let row = array.get(i);
            Vec3::new(row[splat::X], row[splat::Y], row[splat::Z])
        })
        .collect();
    let buckets = build_buckets(&centers, block_size, bucket_size);

    let partial_table_bytes = buckets.partial.len() * 4;
    let centers_bytes = buckets.bucket_count() * LEVEL_1_BUCKET_STORAGE_BYTES as usize;
    let data_base = partial_table_bytes + centers_bytes;
    let mut payload = vec![0u8; data_base + kept.len() * layout.bytes_per_splat];

    for (i, bucket) in buckets.partial.iter().enumerate() {
        write_u32(&mut payload, i * 4, bucket.splats.len() as u32);
    }
    for (i, bucket) in buckets.iter().enumerate() {
        let base = partial_table_bytes + i * LEVEL_1_BUCKET_STORAGE_BYTES as usize;
        payload[base..base + 12].copy_from_slice(bytemuck::bytes_of(&bucket.center));
    }

    let quant_factor = layout.compression_scale_range as f32 / (block_size / 2.0);
    let mut out_index = 0usize;
    for bucket in buckets.iter() {
        for &local in &bucket.splats {
            let base = data_base + out_index * layout.bytes_per_splat;
            write_splat(
                &mut payload[base..],
                layout,
                array.get(kept[local as usize]),
                Some((bucket.center, quant_factor)),
            );
            out_index += 1;
        }
    }

    let header = SectionHeader {
        splat_count,
        max_splat_count: splat_count,
        bucket_size,
        bucket_count: buckets.bucket_count() as u32,
        bucket_block_size: block_size,
        bucket_storage_size_bytes: LEVEL_1_BUCKET_STORAGE_BYTES,
        compression_scale_range: layout.compression_scale_range,
        storage_size_bytes: payload.len() as u32,
        full_bucket_count: buckets.full.len() as u32,
        partially_filled_bucket_count: buckets.partial.len() as u32,
    };
    (header, payload)
}

/// Pack one splat row at the start of `out`. `quant` carries the bucket
/// center and quantization factor at level 1; `None` writes raw f32 centers.
fn write_splat(
    out: &mut [u8],
    layout: &SplatLayout,
    row: &[f32],
    quant: Option<([f32; 3], f32)>,
) {
    match quant {
        None => {
            write_f32(out, 0, row[splat::X]);
            write_f32(out, 4, row[splat::Y]);
            write_f32(out, 8, row[splat::Z]);
        }
        Some((center, factor)) => {
            let range = layout.compression_scale_range as i32;
            for axis in 0..3 {
                let delta = row[splat::X + axis] - center[axis];
                let q = ((delta * factor).round() as i32 + range).clamp(0, 2 * range + 1);
                write_u16(out, axis * 2, q as u16);
            }
        }
    }

    let scale = [row[splat::SCALE0], row[splat::SCALE1], row[splat::SCALE2]];
    // User order (x, y, z, w) goes to storage order (w, x, y, z).
    let q = normalize_quat([
        row[splat::ROTATION0],
        row[splat::ROTATION1],
        row[splat::ROTATION2],
        row[splat::ROTATION3],
    ]);
    let rotation = [q[3], q[0], q[1], q[2]];

    let scale_base = layout.bytes_per_center;
    let rotation_base = scale_base + layout.bytes_per_scale;
    if layout.compression_level == 0 {
        for (i, v) in scale.iter().enumerate() {
            write_f32(out, scale_base + i * 4, *v);
        }
        for (i, v) in rotation.iter().enumerate() {
            write_f32(out, rotation_base + i * 4, *v);
        }
    } else {
        for (i, v) in scale.iter().enumerate() {
            write_u16(out, scale_base + i * 2, float_to_half(*v));
        }
        for (i, v) in rotation.iter().enumerate() {
            write_u16(out, rotation_base + i * 2, float_to_half(*v));
        }
    }

    let color_base = layout.color_offset();
    out[color_base] = clamp_u8(row[splat::FDC0]);
    out[color_base + 1] = clamp_u8(row[splat::FDC1]);
    out[color_base + 2] = clamp_u8(row[splat::FDC2]);
    out[color_base + 3] = clamp_u8(row[splat::OPACITY]);

    let sh_base = layout.sh_offset();
    for k in 0..layout.sh_components {
        let v = row[splat::FRC0 + k];
        if layout.compression_level == 0 {
            write_f32(out, sh_base + k * 4, v);
        } else {
            write_u16(out, sh_base + k * 2, float_to_half(v));
        }
    }
}
