//! Binary artifact format.
//!
//! Layout (every integer and float little-endian):
//! - 4 bytes: magic `CSVI`
//! - 4 bytes: format version (u32)
//! - 4 bytes: kind, 0 = flat, 1 = clustered (u32)
//! - 4 bytes: dimension D (u32)
//! - 8 bytes: vector count N (u64)
//! - clustered only: nlist L (u32), nprobe (u32), L * D centroid f32s, then
//!   per list a u32 length followed by that many u32 ordinals
//! - N * D f32 values, row-major by ordinal

use super::{FlatIndex, IvfIndex, VectorIndex};
use crate::error::IndexError;

const MAGIC: &[u8; 4] = b"CSVI";
const VERSION: u32 = 1;
const KIND_FLAT: u32 = 0;
const KIND_CLUSTERED: u32 = 1;

pub fn encode(index: &VectorIndex) -> Vec<u8> {
    let (kind, vectors) = match index {
        VectorIndex::Flat(flat) => (KIND_FLAT, flat),
        VectorIndex::Clustered(ivf) => (KIND_CLUSTERED, ivf.vectors()),
    };

    let mut out = Vec::with_capacity(24 + std::mem::size_of_val(vectors.data()));
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&kind.to_le_bytes());
    out.extend_from_slice(&(vectors.dim() as u32).to_le_bytes());
    out.extend_from_slice(&(vectors.len() as u64).to_le_bytes());

    if let VectorIndex::Clustered(ivf) = index {
        out.extend_from_slice(&(ivf.nlist() as u32).to_le_bytes());
        out.extend_from_slice(&(ivf.nprobe() as u32).to_le_bytes());
        put_f32s(&mut out, ivf.centroids());
        for list in ivf.lists() {
            out.extend_from_slice(&(list.len() as u32).to_le_bytes());
            put_u32s(&mut out, list);
        }
    }

    put_f32s(&mut out, vectors.data());
    out
}

fn put_f32s(out: &mut Vec<u8>, values: &[f32]) {
    if cfg!(target_endian = "little") {
        out.extend_from_slice(bytemuck::cast_slice(values));
    } else {
        out.extend(values.iter().flat_map(|value| value.to_le_bytes()));
    }
}

fn put_u32s(out: &mut Vec<u8>, values: &[u32]) {
    if cfg!(target_endian = "little") {
        out.extend_from_slice(bytemuck::cast_slice(values));
    } else {
        out.extend(values.iter().flat_map(|value| value.to_le_bytes()));
    }
}

pub fn decode(bytes: &[u8]) -> Result<VectorIndex, IndexError> {
    let mut reader = Reader { bytes, pos: 0 };

    if reader.take(4)? != MAGIC {
        return Err(IndexError::Codec("not an index artifact".to_string()));
    }
    let version = reader.u32()?;
    if version != VERSION {
        return Err(IndexError::Codec(format!("unsupported version {version}")));
    }

    let kind = reader.u32()?;
    let dim = reader.u32()? as usize;
    let count = usize::try_from(reader.u64()?)
        .map_err(|_| IndexError::Codec("vector count overflows usize".to_string()))?;
    if dim == 0 {
        return Err(IndexError::Codec("zero dimension".to_string()));
    }

    let index = match kind {
        KIND_FLAT => VectorIndex::Flat(FlatIndex::new(dim, reader.f32s(count, dim)?)?),
        KIND_CLUSTERED => {
            let nlist = reader.u32()? as usize;
            let nprobe = reader.u32()? as usize;
            let centroids = reader.f32s(nlist, dim)?;

            let mut lists = Vec::with_capacity(nlist);
            let mut seen = vec![false; count];
            for _ in 0..nlist {
                let len = reader.u32()? as usize;
                let list = reader.u32s(len)?;
                for &ordinal in &list {
                    match seen.get_mut(ordinal as usize) {
                        Some(slot) if !*slot => *slot = true,
                        _ => {
                            return Err(IndexError::Codec(format!(
                                "list entry {ordinal} is out of range or repeated"
                            )))
                        }
                    }
                }
                lists.push(list);
            }
            if seen.iter().any(|assigned| !assigned) {
                return Err(IndexError::Codec("some vectors belong to no list".to_string()));
            }

            let vectors = FlatIndex::new(dim, reader.f32s(count, dim)?)?;
            VectorIndex::Clustered(IvfIndex::from_parts(nprobe, centroids, lists, vectors))
        }
        other => return Err(IndexError::Codec(format!("unknown index kind {other}"))),
    };

    if reader.pos != bytes.len() {
        return Err(IndexError::Codec(format!(
            "{} trailing bytes",
            bytes.len() - reader.pos
        )));
    }

    Ok(index)
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], IndexError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| IndexError::Codec("artifact is truncated".to_string()))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn take_n(&mut self, items: usize, width: usize) -> Result<&'a [u8], IndexError> {
        let len = items
            .checked_mul(width)
            .ok_or_else(|| IndexError::Codec("length overflow".to_string()))?;
        self.take(len)
    }

    fn u32(&mut self) -> Result<u32, IndexError> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    fn u64(&mut self) -> Result<u64, IndexError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    // Payload slices are not necessarily 4-byte aligned; copy instead of cast.
    fn u32s(&mut self, items: usize) -> Result<Vec<u32>, IndexError> {
        let mut values: Vec<u32> = bytemuck::pod_collect_to_vec(self.take_n(items, 4)?);
        values.iter_mut().for_each(|value| *value = u32::from_le(*value));
        Ok(values)
    }

    fn f32s(&mut self, rows: usize, dim: usize) -> Result<Vec<f32>, IndexError> {
        let items = rows
            .checked_mul(dim)
            .ok_or_else(|| IndexError::Codec("length overflow".to_string()))?;
        Ok(self
            .u32s(items)?
            .into_iter()
            .map(f32::from_bits)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::IndexingSettings;

    fn sample(count: usize) -> Vec<f32> {
        (0..count * 3).map(|i| (i as f32).sin()).collect()
    }

    #[test]
    fn flat_and_clustered_indexes_survive_encoding() -> Result<(), IndexError> {
        let settings = IndexingSettings {
            ivf_threshold: 10,
            nlist: 3,
            nprobe: 2,
            ..IndexingSettings::default()
        };

        for count in [4, 40] {
            let index = VectorIndex::build(sample(count), 3, &settings)?;
            let decoded = decode(&encode(&index))?;
            assert_eq!(decoded, index);
            assert_eq!(
                decoded.search(&[0.1, 0.2, 0.3], 3)?,
                index.search(&[0.1, 0.2, 0.3], 3)?
            );
        }
        Ok(())
    }

    #[test]
    fn payload_floats_are_little_endian() -> Result<(), IndexError> {
        let index = VectorIndex::build(vec![1.5, -2.0, 0.25], 3, &IndexingSettings::default())?;
        let bytes = encode(&index);

        let payload: Vec<u8> = [1.5f32, -2.0, 0.25]
            .iter()
            .flat_map(|value| value.to_le_bytes())
            .collect();
        assert_eq!(&bytes[24..], payload.as_slice());
        Ok(())
    }

    #[test]
    fn damaged_artifacts_are_rejected() -> Result<(), IndexError> {
        let index = VectorIndex::build(sample(4), 3, &IndexingSettings::default())?;
        let bytes = encode(&index);

        assert!(decode(&bytes[..bytes.len() - 1]).is_err());
        assert!(decode(b"XXXX").is_err());

        let mut longer = bytes.clone();
        longer.push(0);
        assert!(decode(&longer).is_err());

        let mut wrong_version = bytes;
        wrong_version[4] = 9;
        assert!(matches!(decode(&wrong_version), Err(IndexError::Codec(_))));
        Ok(())
    }
}
