//! Geometry streams: raw vertex/index storage and the vertex format that
//! says how to decode stream bytes into shader input registers.

use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

use bytemuck::Pod;

use super::error::{Error, Result};
use super::math::Vec4;
use super::shader::VsInput;
use super::types::{MAX_VERTEX_STREAMS, MAX_VS_INPUTS};

/// Raw vertex bytes
#[derive(Debug)]
pub struct VertexBuffer {
    len: usize,
    data: RefCell<Vec<u8>>,
}

impl VertexBuffer {
    pub fn new(len: usize) -> Result<Self> {
        if len == 0 {
            return Err(Error::InvalidParameters("vertex buffer length must be non-zero"));
        }
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| Error::OutOfMemory("vertex buffer storage"))?;
        data.resize(len, 0);
        Ok(Self { len, data: RefCell::new(data) })
    }

    /// Build a buffer holding a copy of `vertices`
    pub fn from_pod<T: Pod>(vertices: &[T]) -> Result<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(vertices);
        let buffer = Self::new(bytes.len())?;
        buffer.lock()?.copy_from_slice(bytes);
        Ok(buffer)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn lock(&self) -> Result<RefMut<'_, [u8]>> {
        let data = self.data.try_borrow_mut()
            .map_err(|_| Error::InvalidState("vertex buffer is already locked"))?;
        Ok(RefMut::map(data, |v| v.as_mut_slice()))
    }

    pub(crate) fn read(&self) -> Result<Ref<'_, [u8]>> {
        let data = self.data.try_borrow()
            .map_err(|_| Error::InvalidState("vertex buffer is locked"))?;
        Ok(Ref::map(data, |v| v.as_slice()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    U16,
    U32,
}

impl IndexFormat {
    pub fn size(self) -> usize {
        match self {
            IndexFormat::U16 => 2,
            IndexFormat::U32 => 4,
        }
    }
}

/// Raw index bytes (16 or 32 bit little-endian indices)
#[derive(Debug)]
pub struct IndexBuffer {
    format: IndexFormat,
    count: usize,
    data: RefCell<Vec<u8>>,
}

impl IndexBuffer {
    pub fn new(count: usize, format: IndexFormat) -> Result<Self> {
        if count == 0 {
            return Err(Error::InvalidParameters("index buffer must hold at least one index"));
        }
        Ok(Self { format, count, data: RefCell::new(vec![0; count * format.size()]) })
    }

    pub fn from_u16(indices: &[u16]) -> Result<Self> {
        let buffer = Self::new(indices.len(), IndexFormat::U16)?;
        buffer.lock()?.copy_from_slice(bytemuck::cast_slice(indices));
        Ok(buffer)
    }

    pub fn from_u32(indices: &[u32]) -> Result<Self> {
        let buffer = Self::new(indices.len(), IndexFormat::U32)?;
        buffer.lock()?.copy_from_slice(bytemuck::cast_slice(indices));
        Ok(buffer)
    }

    pub fn format(&self) -> IndexFormat {
        self.format
    }

    pub fn index_count(&self) -> usize {
        self.count
    }

    pub fn lock(&self) -> Result<RefMut<'_, [u8]>> {
        let data = self.data.try_borrow_mut()
            .map_err(|_| Error::InvalidState("index buffer is already locked"))?;
        Ok(RefMut::map(data, |v| v.as_mut_slice()))
    }

    pub(crate) fn view(&self) -> Result<IndexView<'_>> {
        let data = self.data.try_borrow()
            .map_err(|_| Error::InvalidState("index buffer is locked"))?;
        Ok(IndexView { data: Ref::map(data, |v| v.as_slice()), format: self.format })
    }
}

/// Read access to an index buffer for the duration of a draw
pub(crate) struct IndexView<'a> {
    data: Ref<'a, [u8]>,
    format: IndexFormat,
}

impl IndexView<'_> {
    pub fn get(&self, i: u32) -> Result<u32> {
        let size = self.format.size();
        let start = i as usize * size;
        let bytes = self.data.get(start..start + size)
            .ok_or(Error::InvalidParameters("index read past the end of the index buffer"))?;
        Ok(match self.format {
            IndexFormat::U16 => bytemuck::pod_read_unaligned::<u16>(bytes) as u32,
            IndexFormat::U32 => bytemuck::pod_read_unaligned::<u32>(bytes),
        })
    }
}

/// Number of floats an element reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    Float1,
    Float2,
    Float3,
    Float4,
}

impl ElementType {
    pub fn floats(self) -> usize {
        match self {
            ElementType::Float1 => 1,
            ElementType::Float2 => 2,
            ElementType::Float3 => 3,
            ElementType::Float4 => 4,
        }
    }

    pub fn size(self) -> usize {
        self.floats() * 4
    }
}

/// One declared vertex attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexElement {
    pub stream: usize,
    pub element_type: ElementType,
    pub register: usize,
}

impl VertexElement {
    pub fn new(stream: usize, element_type: ElementType, register: usize) -> Self {
        Self { stream, element_type, register }
    }
}

/// Vertex layout; element offsets are packed per stream in declaration order
#[derive(Debug, Clone)]
pub struct VertexFormat {
    elements: Vec<(VertexElement, usize)>,
}

impl VertexFormat {
    pub fn new(elements: &[VertexElement]) -> Result<Self> {
        if elements.is_empty() {
            return Err(Error::InvalidParameters("vertex format needs at least one element"));
        }
        let mut used = [false; MAX_VS_INPUTS];
        let mut stream_offsets = [0usize; MAX_VERTEX_STREAMS];
        let mut out = Vec::with_capacity(elements.len());
        for e in elements {
            if e.register >= MAX_VS_INPUTS {
                return Err(Error::InvalidParameters("vertex element register out of range"));
            }
            if e.stream >= MAX_VERTEX_STREAMS {
                return Err(Error::InvalidParameters("vertex element stream out of range"));
            }
            if std::mem::replace(&mut used[e.register], true) {
                return Err(Error::InvalidParameters("input register declared twice"));
            }
            out.push((*e, stream_offsets[e.stream]));
            stream_offsets[e.stream] += e.element_type.size();
        }
        Ok(Self { elements: out })
    }

    pub fn elements(&self) -> impl Iterator<Item = &VertexElement> {
        self.elements.iter().map(|(e, _)| e)
    }

    /// Bitmask of referenced streams
    pub fn stream_mask(&self) -> u32 {
        self.elements.iter().fold(0, |m, (e, _)| m | (1 << e.stream))
    }

    /// Decode vertex `index` into shader input registers
    pub(crate) fn decode(&self, streams: &[Option<StreamView<'_>>], index: u32) -> Result<VsInput> {
        let mut input = VsInput::default();
        for (element, element_offset) in &self.elements {
            let stream = streams.get(element.stream)
                .and_then(|s| s.as_ref())
                .ok_or(Error::InvalidState("vertex stream not bound"))?;
            let past_end = Error::InvalidState("vertex read past the end of the stream");
            let start = (index as usize)
                .checked_mul(stream.stride)
                .and_then(|v| v.checked_add(stream.offset))
                .and_then(|v| v.checked_add(*element_offset))
                .ok_or(past_end)?;
            let end = start.checked_add(element.element_type.size()).ok_or(past_end)?;
            let bytes = stream.data.get(start..end).ok_or(past_end)?;

            let mut reg = Vec4::POINT;
            for (c, chunk) in bytes.chunks_exact(4).enumerate() {
                reg[c] = bytemuck::pod_read_unaligned::<f32>(chunk);
            }
            input.registers[element.register] = reg;
        }
        Ok(input)
    }
}

/// A vertex buffer bound to a stream slot
#[derive(Debug, Clone)]
pub struct VertexStream {
    pub buffer: Rc<VertexBuffer>,
    /// Byte offset of vertex 0
    pub offset: usize,
    /// Bytes between consecutive vertices
    pub stride: usize,
}

/// Read access to a bound stream for the duration of a draw
pub(crate) struct StreamView<'a> {
    data: Ref<'a, [u8]>,
    offset: usize,
    stride: usize,
}

impl VertexStream {
    pub(crate) fn view(&self) -> Result<StreamView<'_>> {
        Ok(StreamView { data: self.buffer.read()?, offset: self.offset, stride: self.stride })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bind(buffer: &Rc<VertexBuffer>, stride: usize) -> VertexStream {
        VertexStream { buffer: buffer.clone(), offset: 0, stride }
    }

    #[test]
    fn test_decode_defaults_trailing_components() {
        let vb = Rc::new(VertexBuffer::from_pod(&[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap());
        let format = VertexFormat::new(&[
            VertexElement::new(0, ElementType::Float2, 0),
            VertexElement::new(0, ElementType::Float1, 1),
        ])
        .unwrap();
        let stream = bind(&vb, 12);
        let views = [Some(stream.view().unwrap())];
        let v1 = format.decode(&views, 1).unwrap();
        assert_eq!(v1.registers[0], Vec4::new(4.0, 5.0, 0.0, 1.0));
        assert_eq!(v1.registers[1], Vec4::new(6.0, 0.0, 0.0, 1.0));
        assert_eq!(v1.registers[2], Vec4::ZERO);
    }

    #[test]
    fn test_decode_float4_reads_w() {
        let vb = Rc::new(VertexBuffer::from_pod(&[1.0f32, 2.0, 3.0, 0.5]).unwrap());
        let format = VertexFormat::new(&[VertexElement::new(0, ElementType::Float4, 3)]).unwrap();
        let stream = bind(&vb, 16);
        let views = [Some(stream.view().unwrap())];
        assert_eq!(format.decode(&views, 0).unwrap().registers[3], Vec4::new(1.0, 2.0, 3.0, 0.5));
    }

    #[test]
    fn test_decode_overrun_is_invalid_state() {
        let vb = Rc::new(VertexBuffer::from_pod(&[0.0f32; 6]).unwrap());
        let format = VertexFormat::new(&[VertexElement::new(0, ElementType::Float3, 0)]).unwrap();
        let stream = bind(&vb, 12);
        let views = [Some(stream.view().unwrap())];
        assert!(format.decode(&views, 1).is_ok());
        assert!(matches!(format.decode(&views, 2), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_format_validation() {
        assert!(VertexFormat::new(&[]).is_err());
        assert!(VertexFormat::new(&[VertexElement::new(0, ElementType::Float1, MAX_VS_INPUTS)]).is_err());
        assert!(VertexFormat::new(&[
            VertexElement::new(0, ElementType::Float1, 0),
            VertexElement::new(1, ElementType::Float1, 0),
        ])
        .is_err());
        let f = VertexFormat::new(&[
            VertexElement::new(0, ElementType::Float3, 0),
            VertexElement::new(1, ElementType::Float2, 1),
            VertexElement::new(0, ElementType::Float3, 2),
        ])
        .unwrap();
        assert_eq!(f.stream_mask(), 0b11);

        // element offsets run per stream: register 2 follows register 0
        // in stream 0, register 1 starts stream 1
        let s0 = Rc::new(VertexBuffer::from_pod(&[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap());
        let s1 = Rc::new(VertexBuffer::from_pod(&[7.0f32, 8.0]).unwrap());
        let (b0, b1) = (bind(&s0, 24), bind(&s1, 8));
        let views = [Some(b0.view().unwrap()), Some(b1.view().unwrap())];
        let v = f.decode(&views, 0).unwrap();
        assert_eq!(v.registers[0], Vec4::new(1.0, 2.0, 3.0, 1.0));
        assert_eq!(v.registers[1], Vec4::new(7.0, 8.0, 0.0, 1.0));
        assert_eq!(v.registers[2], Vec4::new(4.0, 5.0, 6.0, 1.0));
    }

    #[test]
    fn test_decode_offset_overflow_is_invalid_state() {
        let vb = Rc::new(VertexBuffer::from_pod(&[0.0f32; 4]).unwrap());
        let format = VertexFormat::new(&[VertexElement::new(0, ElementType::Float4, 0)]).unwrap();
        let stream = VertexStream { buffer: vb.clone(), offset: usize::MAX - 2, stride: 16 };
        let views = [Some(stream.view().unwrap())];
        assert!(matches!(format.decode(&views, 0), Err(Error::InvalidState(_))));

        let stream = VertexStream { buffer: vb, offset: 0, stride: usize::MAX };
        let views = [Some(stream.view().unwrap())];
        assert!(format.decode(&views, 0).is_ok());
        assert!(matches!(format.decode(&views, 2), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_index_reads() {
        let ib = IndexBuffer::from_u16(&[3, 7, 65535]).unwrap();
        let view = ib.view().unwrap();
        assert_eq!(view.get(2).unwrap(), 65535);
        assert!(matches!(view.get(3), Err(Error::InvalidParameters(_))));
        let ib = IndexBuffer::from_u32(&[100_000]).unwrap();
        assert_eq!(ib.view().unwrap().get(0).unwrap(), 100_000);
    }
}
