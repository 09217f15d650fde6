use glam::{Affine3A, Vec3};

use crate::common::{
    float_to_half, half_to_float, read_f32, read_u16, read_u32, sh_channel_components_for_degree,
    write_u32,
};
use crate::error::SplatBufError;
use crate::structures::{Header, SectionHeader, SplatLayout, HEADER_BYTES, SECTION_HEADER_BYTES};
use crate::transform::{splat_covariance, ShRotation};

// Scale and rotation element offsets, in units of the field width.
const SCALE_OFFSET_ELEMENTS: usize = 3;
const ROTATION_OFFSET_ELEMENTS: usize = 6;

/// Reader-side section state: the parsed header plus absolute byte offsets of
/// the section's three payload regions.
#[derive(Clone, Debug)]
pub struct Section {
    pub header: SectionHeader,
    /// Start of the partial-bucket-length table.
    pub base: usize,
    /// Start of the bucket-center table.
    pub buckets_base: usize,
    /// Start of the splat data.
    pub data_base: usize,
    /// Global index of this section's first splat.
    pub splat_count_offset: u32,
    /// World units per quantization step (level 1; 0.0 at level 0).
    pub compression_scale_factor: f32,
}

impl Section {
    /// Resolve a local splat index to its bucket. Full buckets are implicit;
    /// the tail is a linear scan of the partial-length table.
    fn bucket_index_for_local(&self, data: &[u8], local: u32) -> u32 {
        let full_span = self.header.full_bucket_count * self.header.bucket_size;
        if local < full_span {
            return local / self.header.bucket_size;
        }
        let mut start = full_span;
        for scan in 0..self.header.partially_filled_bucket_count {
            let len = read_u32(data, self.base + scan as usize * 4);
            if local < start + len {
                return self.header.full_bucket_count + scan;
            }
            start += len;
        }
        self.header.bucket_count.saturating_sub(1)
    }
}

/// Output sink for bulk fills that can emit either representation.
pub enum FloatsMut<'a> {
    F32(&'a mut [f32]),
    F16(&'a mut [u16]),
}

impl FloatsMut<'_> {
    #[inline]
    fn put(&mut self, index: usize, value: f32) {
        match self {
            FloatsMut::F32(out) => out[index] = value,
            FloatsMut::F16(out) => out[index] = float_to_half(value),
        }
    }
}

/// A parsed splat container. Owns its bytes; every accessor decodes
/// little-endian fields at read time.
pub struct SplatBuffer {
    data: Vec<u8>,
    header: Header,
    layout: SplatLayout,
    sections: Vec<Section>,
    global_to_section: Vec<u32>,
    global_to_local: Vec<u32>,
}

impl SplatBuffer {
    pub fn parse(data: Vec<u8>) -> Result<Self, SplatBufError> {
        let header = Header::parse(&data)?;
        let layout = SplatLayout::new(header.compression_level, header.sh_degree)?;

        let headers_end = HEADER_BYTES + header.max_section_count as usize * SECTION_HEADER_BYTES;
        if data.len() < headers_end {
            return Err(SplatBufError::CorruptBuffer(format!(
                "section header table ends at {} but the buffer holds {} bytes",
                headers_end,
                data.len()
            )));
        }

        let mut sections = Vec::with_capacity(header.max_section_count as usize);
        let mut base = headers_end;
        let mut live_splats = 0u32;
        let mut capacity = 0u64;
        for i in 0..header.max_section_count as usize {
            let header_base = HEADER_BYTES + i * SECTION_HEADER_BYTES;
            let section_header =
                SectionHeader::parse(&data[header_base..header_base + SECTION_HEADER_BYTES]);
            let partial_table_bytes = section_header.partial_table_bytes();
            let centers_bytes = section_header.bucket_center_bytes();
            let storage = section_header.storage_size_bytes as usize;

            let region = partial_table_bytes
                + centers_bytes
                + section_header.max_splat_count as usize * layout.bytes_per_splat;
            if region > storage {
                return Err(SplatBufError::CorruptBuffer(format!(
                    "section {} regions need {} bytes but its header reports {}",
                    i, region, storage
                )));
            }
            if base + storage > data.len() {
                return Err(SplatBufError::CorruptBuffer(format!(
                    "section {} extends to byte {} but the buffer holds {}",
                    i,
                    base + storage,
                    data.len()
                )));
            }
            if section_header.splat_count > section_header.max_splat_count {
                return Err(SplatBufError::CorruptBuffer(format!(
                    "section {} splat count {} exceeds capacity {}",
                    i, section_header.splat_count, section_header.max_splat_count
                )));
            }
            if i < header.section_count as usize {
                live_splats += section_header.splat_count;
            }
            capacity += section_header.max_splat_count as u64;

            let scale_factor = if section_header.compression_scale_range > 0 {
                section_header.compression_scale_factor()
            } else {
                0.0
            };
            sections.push(Section {
                base,
                buckets_base: base + partial_table_bytes,
                data_base: base + partial_table_bytes + centers_bytes,
                splat_count_offset: 0,
                compression_scale_factor: scale_factor,
                header: section_header,
            });
            base += storage;
        }

        if header.splat_count > live_splats {
            return Err(SplatBufError::CorruptBuffer(format!(
                "file header counts {} splats but live sections hold {}",
                header.splat_count, live_splats
            )));
        }
        if header.max_splat_count as u64 > capacity {
            return Err(SplatBufError::CorruptBuffer(format!(
                "file header claims capacity {} but sections back only {}",
                header.max_splat_count, capacity
            )));
        }

        let mut buffer = Self {
            data,
            header,
            layout,
            sections,
            global_to_section: Vec::new(),
            global_to_local: Vec::new(),
        };
        buffer.rebuild_index();
        Ok(buffer)
    }

    /// Recompute section offsets and the global index maps from the live
    /// counters.
    fn rebuild_index(&mut self) {
        let mut offset = 0u32;
        let live = self.header.section_count as usize;
        for (i, section) in self.sections.iter_mut().enumerate() {
            section.splat_count_offset = offset;
            if i < live {
                offset += section.header.splat_count;
            }
        }

        let max = self.header.max_splat_count as usize;
        self.global_to_section = vec![0; max];
        self.global_to_local = vec![0; max];
        let mut g = 0usize;
        'outer: for (si, section) in self.sections.iter().enumerate().take(live) {
            for local in 0..section.header.splat_count as usize {
                if g >= max {
                    break 'outer;
                }
                self.global_to_section[g] = si as u32;
                self.global_to_local[g] = local as u32;
                g += 1;
            }
        }
    }

    #[inline]
    pub fn header(&self) -> &Header {
        &self.header
    }

    #[inline]
    pub fn layout(&self) -> &SplatLayout {
        &self.layout
    }

    #[inline]
    pub fn splat_count(&self) -> u32 {
        self.header.splat_count
    }

    #[inline]
    pub fn section_count(&self) -> u32 {
        self.header.section_count
    }

    #[inline]
    pub fn compression_level(&self) -> u16 {
        self.header.compression_level
    }

    #[inline]
    pub fn sh_degree(&self) -> u16 {
        self.header.sh_degree
    }

    #[inline]
    pub fn scene_center(&self) -> [f32; 3] {
        self.header.scene_center
    }

    #[inline]
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Publish new live counts into the file header. Payload bytes are left
    /// untouched. Counts may not exceed the buffer's capacities.
    pub fn update_loaded_counts(
        &mut self,
        section_count: u32,
        splat_count: u32,
    ) -> Result<(), SplatBufError> {
        if section_count > self.header.max_section_count {
            return Err(SplatBufError::InvalidCount(format!(
                "section count {} exceeds capacity {}",
                section_count, self.header.max_section_count
            )));
        }
        if splat_count > self.header.max_splat_count {
            return Err(SplatBufError::InvalidCount(format!(
                "splat count {} exceeds capacity {}",
                splat_count, self.header.max_splat_count
            )));
        }
        write_u32(&mut self.data, 8, section_count);
        write_u32(&mut self.data, 16, splat_count);
        self.header.section_count = section_count;
        self.header.splat_count = splat_count;
        self.rebuild_index();
        Ok(())
    }

    /// Publish a section's live splat count into its section header.
    pub fn update_section_splat_count(
        &mut self,
        section_index: usize,
        splat_count: u32,
    ) -> Result<(), SplatBufError> {
        let max = match self.sections.get(section_index) {
            Some(section) => section.header.max_splat_count,
            None => {
                return Err(SplatBufError::InvalidCount(format!(
                    "no section {}",
                    section_index
                )))
            }
        };
        if splat_count > max {
            return Err(SplatBufError::InvalidCount(format!(
                "section {} splat count {} exceeds capacity {}",
                section_index, splat_count, max
            )));
        }
        self.sections[section_index].header.splat_count = splat_count;
        let offset = HEADER_BYTES + section_index * SECTION_HEADER_BYTES;
        write_u32(&mut self.data, offset, splat_count);
        self.rebuild_index();
        Ok(())
    }

    #[inline]
    fn locate(&self, global: usize) -> (&Section, usize) {
        let section = &self.sections[self.global_to_section[global] as usize];
        (section, global - section.splat_count_offset as usize)
    }

    #[inline]
    fn splat_base(&self, section: &Section, local: usize) -> usize {
        section.data_base + local * self.layout.bytes_per_splat
    }

    /// One scale/rotation/SH element, decoded to f32. `element` counts in
    /// units of the layout's field width.
    #[inline]
    fn field_float(&self, splat_base: usize, element: usize) -> f32 {
        let offset = splat_base + element * self.layout.field_width();
        if self.layout.compression_level == 0 {
            read_f32(&self.data, offset)
        } else {
            half_to_float(read_u16(&self.data, offset))
        }
    }

    pub fn splat_center(&self, global: usize) -> [f32; 3] {
        let (section, local) = self.locate(global);
        let base = self.splat_base(section, local);
        if self.layout.compression_level == 0 {
            [
                read_f32(&self.data, base),
                read_f32(&self.data, base + 4),
                read_f32(&self.data, base + 8),
            ]
        } else {
            let bucket = section.bucket_index_for_local(&self.data, local as u32) as usize;
            let center_base =
                section.buckets_base + bucket * section.header.bucket_storage_size_bytes as usize;
            let range = section.header.compression_scale_range as i32;
            let mut out = [0.0f32; 3];
            for (axis, v) in out.iter_mut().enumerate() {
                let q = read_u16(&self.data, base + axis * 2) as i32;
                *v = (q - range) as f32 * section.compression_scale_factor
                    + read_f32(&self.data, center_base + axis * 4);
            }
            out
        }
    }

    pub fn splat_scale(&self, global: usize) -> [f32; 3] {
        let (section, local) = self.locate(global);
        let base = self.splat_base(section, local);
        [
            self.field_float(base, SCALE_OFFSET_ELEMENTS),
            self.field_float(base, SCALE_OFFSET_ELEMENTS + 1),
            self.field_float(base, SCALE_OFFSET_ELEMENTS + 2),
        ]
    }

    /// Rotation in user order (x, y, z, w); storage order is (w, x, y, z).
    pub fn splat_rotation(&self, global: usize) -> [f32; 4] {
        let (section, local) = self.locate(global);
        let base = self.splat_base(section, local);
        let w = self.field_float(base, ROTATION_OFFSET_ELEMENTS);
        let x = self.field_float(base, ROTATION_OFFSET_ELEMENTS + 1);
        let y = self.field_float(base, ROTATION_OFFSET_ELEMENTS + 2);
        let z = self.field_float(base, ROTATION_OFFSET_ELEMENTS + 3);
        [x, y, z, w]
    }

    pub fn splat_color(&self, global: usize) -> [u8; 4] {
        let (section, local) = self.locate(global);
        let base = self.splat_base(section, local) + self.layout.color_offset();
        [
            self.data[base],
            self.data[base + 1],
            self.data[base + 2],
            self.data[base + 3],
        ]
    }

    /// Fill `out` with stride-3 centers for the inclusive range
    /// `[src_from, src_to]`, starting at `dest_from` splats into `out`.
    pub fn fill_centers(
        &self,
        out: &mut [f32],
        transform: Option<&Affine3A>,
        src_from: usize,
        src_to: usize,
        dest_from: usize,
    ) {
        for g in src_from..=src_to {
            let center = self.splat_center(g);
            let center = match transform {
                Some(t) => t.transform_point3(Vec3::from(center)).to_array(),
                None => center,
            };
            let base = (dest_from + (g - src_from)) * 3;
            out[base..base + 3].copy_from_slice(&center);
        }
    }

    /// Fill `out` with stride-4 RGBA. Output alphas below `minimum_alpha`
    /// are rewritten to 0; source bytes are untouched.
    pub fn fill_colors(
        &self,
        out: &mut [u8],
        minimum_alpha: u8,
        src_from: usize,
        src_to: usize,
        dest_from: usize,
    ) {
        for g in src_from..=src_to {
            let mut color = self.splat_color(g);
            if color[3] < minimum_alpha {
                color[3] = 0;
            }
            let base = (dest_from + (g - src_from)) * 4;
            out[base..base + 4].copy_from_slice(&color);
        }
    }

    /// Fill `out` with stride-6 upper-triangular covariances in the element
    /// order (0,0),(1,0),(2,0),(1,1),(2,1),(2,2), conjugated by the 3x3 part
    /// of `transform` when given.
    pub fn fill_covariances(
        &self,
        out: &mut FloatsMut<'_>,
        transform: Option<&Affine3A>,
        src_from: usize,
        src_to: usize,
        dest_from: usize,
    ) {
        let t3 = transform.map(|t| t.matrix3);
        for g in src_from..=src_to {
            let cov = splat_covariance(self.splat_scale(g), self.splat_rotation(g), t3.as_ref());
            let base = (dest_from + (g - src_from)) * 6;
            for (k, v) in cov.iter().enumerate() {
                out.put(base + k, *v);
            }
        }
    }

    /// Fill `out` with channel-major SH blocks of degree
    /// `min(out_degree, stored degree)`, rotating through `transform` when
    /// given. Half-float sources are decoded to f32 before the math and the
    /// result is re-encoded to the sink's representation.
    pub fn fill_spherical_harmonics(
        &self,
        out: &mut FloatsMut<'_>,
        out_degree: u16,
        transform: Option<&Affine3A>,
        src_from: usize,
        src_to: usize,
        dest_from: usize,
    ) {
        let out_degree = out_degree.min(self.header.sh_degree);
        let out_stride = 3 * sh_channel_components_for_degree(out_degree);
        if out_stride == 0 {
            return;
        }
        let rotation = transform.map(ShRotation::from_affine);

        let mut coeffs = [0.0f32; 24];
        let mut rotated = [0.0f32; 24];
        for g in src_from..=src_to {
            let (section, local) = self.locate(g);
            let base = self.splat_base(section, local) + self.layout.sh_offset();
            for (k, c) in coeffs.iter_mut().enumerate().take(out_stride) {
                *c = self.field_float(base, k);
            }

            let dest = (dest_from + (g - src_from)) * out_stride;
            match &rotation {
                None => {
                    for k in 0..out_stride {
                        out.put(dest + k, coeffs[k]);
                    }
                }
                Some(rot) => {
                    rot.rotate_band1(&coeffs[..9], &mut rotated[..9]);
                    if out_degree >= 2 {
                        rot.rotate_band2(&coeffs[9..24], &mut rotated[9..24]);
                    }
                    for k in 0..out_stride {
                        out.put(dest + k, rotated[k]);
                    }
                }
            }
        }
    }

    /// Consistency check over the live sections: bucket tables must cover
    /// every splat and the index maps must honor the global ordering.
    pub fn validate(&self) -> Result<(), SplatBufError> {
        let live = self.header.section_count as usize;
        let total: u32 = self
            .sections
            .iter()
            .take(live)
            .map(|s| s.header.splat_count)
            .sum();
        if self.header.splat_count > total {
            return Err(SplatBufError::CorruptBuffer(format!(
                "file header counts {} splats but live sections hold {}",
                self.header.splat_count, total
            )));
        }

        for (i, section) in self.sections.iter().enumerate().take(live) {
            let h = &section.header;
            if self.layout.compression_level == 0 {
                continue;
            }
            if h.bucket_count != h.full_bucket_count + h.partially_filled_bucket_count {
                return Err(SplatBufError::CorruptBuffer(format!(
                    "section {} bucket count {} != {} full + {} partial",
                    i, h.bucket_count, h.full_bucket_count, h.partially_filled_bucket_count
                )));
            }
            let mut covered = h.full_bucket_count as u64 * h.bucket_size as u64;
            for scan in 0..h.partially_filled_bucket_count {
                covered += read_u32(&self.data, section.base + scan as usize * 4) as u64;
            }
            if covered != h.max_splat_count as u64 {
                return Err(SplatBufError::CorruptBuffer(format!(
                    "section {} buckets cover {} of {} splats",
                    i, covered, h.max_splat_count
                )));
            }
        }

        for g in 0..self.header.splat_count as usize {
            let section = &self.sections[self.global_to_section[g] as usize];
            if section.splat_count_offset as usize + self.global_to_local[g] as usize != g {
                return Err(SplatBufError::CorruptBuffer(format!(
                    "global index map broken at splat {}",
                    g
                )));
            }
        }
        Ok(())
    }
}
