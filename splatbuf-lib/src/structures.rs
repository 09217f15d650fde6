use crate::common::{
    read_f32, read_u16, read_u32, sh_components_for_degree, write_f32, write_u16, write_u32,
};
use crate::error::SplatBufError;

pub const HEADER_BYTES: usize = 4096;
pub const SECTION_HEADER_BYTES: usize = 1024;

pub const CURRENT_MAJOR_VERSION: u8 = 0;
pub const CURRENT_MINOR_VERSION: u8 = 1;

/// Maximum absolute quantized position delta at compression level 1.
pub const LEVEL_1_SCALE_RANGE: u32 = 32767;
/// Bytes per bucket center entry (3 x f32) at compression level 1.
pub const LEVEL_1_BUCKET_STORAGE_BYTES: u16 = 12;

pub const DEFAULT_BLOCK_SIZE: f32 = 5.0;
pub const DEFAULT_BUCKET_SIZE: u32 = 256;

/// Per-splat field sizes and offsets for a (compression level, SH degree) pair.
///
/// Field order within a splat: center, scale, rotation, color, SH.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SplatLayout {
    pub compression_level: u16,
    pub sh_degree: u16,
    pub bytes_per_center: usize,
    pub bytes_per_scale: usize,
    pub bytes_per_rotation: usize,
    pub bytes_per_color: usize,
    pub sh_components: usize,
    pub sh_bytes: usize,
    pub bytes_per_splat: usize,
    pub compression_scale_range: u32,
}

impl SplatLayout {
    pub fn new(compression_level: u16, sh_degree: u16) -> Result<Self, SplatBufError> {
        if compression_level > 1 {
            return Err(SplatBufError::InvalidCompressionLevel(compression_level));
        }
        if sh_degree > 2 {
            return Err(SplatBufError::InvalidShDegree(sh_degree));
        }
        let (bytes_per_center, bytes_per_scale, bytes_per_rotation, sh_element_bytes, range) =
            if compression_level == 0 {
                (12, 12, 16, 4, 1)
            } else {
                (6, 6, 8, 2, LEVEL_1_SCALE_RANGE)
            };
        let sh_components = sh_components_for_degree(sh_degree);
        let sh_bytes = sh_components * sh_element_bytes;
        Ok(Self {
            compression_level,
            sh_degree,
            bytes_per_center,
            bytes_per_scale,
            bytes_per_rotation,
            bytes_per_color: 4,
            sh_components,
            sh_bytes,
            bytes_per_splat: bytes_per_center
                + bytes_per_scale
                + bytes_per_rotation
                + 4
                + sh_bytes,
            compression_scale_range: range,
        })
    }

    /// Width in bytes of one scale/rotation/SH element.
    #[inline]
    pub fn field_width(&self) -> usize {
        if self.compression_level == 0 {
            4
        } else {
            2
        }
    }

    #[inline]
    pub fn color_offset(&self) -> usize {
        self.bytes_per_center + self.bytes_per_scale + self.bytes_per_rotation
    }

    #[inline]
    pub fn sh_offset(&self) -> usize {
        self.color_offset() + self.bytes_per_color
    }
}

/// The 4096-byte file header. Bytes past the defined fields are reserved zero.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Header {
    pub version_major: u8,
    pub version_minor: u8,
    pub max_section_count: u32,
    pub section_count: u32,
    pub max_splat_count: u32,
    pub splat_count: u32,
    pub compression_level: u16,
    pub scene_center: [f32; 3],
    pub sh_degree: u16,
}

impl Header {
    pub fn parse(data: &[u8]) -> Result<Self, SplatBufError> {
        if data.len() < HEADER_BYTES {
            return Err(SplatBufError::CorruptBuffer(format!(
                "buffer holds {} bytes, the file header needs {}",
                data.len(),
                HEADER_BYTES
            )));
        }
        let header = Self {
            version_major: data[0],
            version_minor: data[1],
            max_section_count: read_u32(data, 4),
            section_count: read_u32(data, 8),
            max_splat_count: read_u32(data, 12),
            splat_count: read_u32(data, 16),
            compression_level: read_u16(data, 20),
            scene_center: [read_f32(data, 24), read_f32(data, 28), read_f32(data, 32)],
            sh_degree: read_u16(data, 36),
        };
        if header.version_major > CURRENT_MAJOR_VERSION {
            return Err(SplatBufError::UnsupportedVersion(format!(
                "major version {} is newer than supported {}",
                header.version_major, CURRENT_MAJOR_VERSION
            )));
        }
        if header.compression_level > 1 {
            return Err(SplatBufError::InvalidCompressionLevel(
                header.compression_level,
            ));
        }
        if header.sh_degree > 2 {
            return Err(SplatBufError::InvalidShDegree(header.sh_degree));
        }
        if header.section_count > header.max_section_count {
            return Err(SplatBufError::CorruptBuffer(format!(
                "section count {} exceeds capacity {}",
                header.section_count, header.max_section_count
            )));
        }
        if header.splat_count > header.max_splat_count {
            return Err(SplatBufError::CorruptBuffer(format!(
                "splat count {} exceeds capacity {}",
                header.splat_count, header.max_splat_count
            )));
        }
        Ok(header)
    }

    /// `out` must span the full header; reserved bytes are left untouched.
    pub fn write_into(&self, out: &mut [u8]) {
        out[0] = self.version_major;
        out[1] = self.version_minor;
        write_u32(out, 4, self.max_section_count);
        write_u32(out, 8, self.section_count);
        write_u32(out, 12, self.max_splat_count);
        write_u32(out, 16, self.splat_count);
        write_u16(out, 20, self.compression_level);
        write_f32(out, 24, self.scene_center[0]);
        write_f32(out, 28, self.scene_center[1]);
        write_f32(out, 32, self.scene_center[2]);
        write_u16(out, 36, self.sh_degree);
    }
}

/// One 1024-byte section header.
///
/// The section payload region holds, contiguously: the partial-bucket-length
/// table (`partially_filled_bucket_count` x u32), the bucket-center table
/// (`bucket_count` x 3 x f32, level 1 only), then the splat data
/// (`max_splat_count` x bytes-per-splat).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SectionHeader {
    pub splat_count: u32,
    pub max_splat_count: u32,
    pub bucket_size: u32,
    pub bucket_count: u32,
    pub bucket_block_size: f32,
    pub bucket_storage_size_bytes: u16,
    pub compression_scale_range: u32,
    pub storage_size_bytes: u32,
    pub full_bucket_count: u32,
    pub partially_filled_bucket_count: u32,
}

impl SectionHeader {
    pub fn parse(data: &[u8]) -> Self {
        Self {
            splat_count: read_u32(data, 0),
            max_splat_count: read_u32(data, 4),
            bucket_size: read_u32(data, 8),
            bucket_count: read_u32(data, 12),
            bucket_block_size: read_f32(data, 16),
            bucket_storage_size_bytes: read_u16(data, 20),
            compression_scale_range: read_u32(data, 24),
            storage_size_bytes: read_u32(data, 28),
            full_bucket_count: read_u32(data, 32),
            partially_filled_bucket_count: read_u32(data, 36),
        }
    }

    pub fn write_into(&self, out: &mut [u8]) {
        write_u32(out, 0, self.splat_count);
        write_u32(out, 4, self.max_splat_count);
        write_u32(out, 8, self.bucket_size);
        write_u32(out, 12, self.bucket_count);
        write_f32(out, 16, self.bucket_block_size);
        write_u16(out, 20, self.bucket_storage_size_bytes);
        write_u32(out, 24, self.compression_scale_range);
        write_u32(out, 28, self.storage_size_bytes);
        write_u32(out, 32, self.full_bucket_count);
        write_u32(out, 36, self.partially_filled_bucket_count);
    }

    #[inline]
    pub fn partial_table_bytes(&self) -> usize {
        self.partially_filled_bucket_count as usize * 4
    }

    #[inline]
    pub fn bucket_center_bytes(&self) -> usize {
        self.bucket_count as usize * self.bucket_storage_size_bytes as usize
    }

    /// Decode factor for level-1 centers: world units per quantization step.
    #[inline]
    pub fn compression_scale_factor(&self) -> f32 {
        (self.bucket_block_size / 2.0) / self.compression_scale_range as f32
    }
}
