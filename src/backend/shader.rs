// Shader module loading
//
// Shaders arrive as SPIR-V compiled offline (see build.rs). This module only
// reads and checks the blobs and wraps them in short-lived shader modules.

use super::device::DeviceContext;
use super::error::{RendererError, Result};
use ash::vk;
use std::io::{self, Read, Seek};
use std::path::Path;

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Read SPIR-V words, fixing endianness and rejecting anything that is not
/// a whole number of words starting with the SPIR-V magic number
pub fn parse_spirv<R: Read + Seek>(reader: &mut R) -> io::Result<Vec<u32>> {
    let words = ash::util::read_spv(reader)?;
    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        Some(&word) => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("bad SPIR-V magic number {word:#010x}"),
        )),
        None => Err(io::Error::new(io::ErrorKind::InvalidData, "empty SPIR-V binary")),
    }
}

pub fn load_spirv(path: &Path) -> Result<Vec<u32>> {
    let shader_error = |source| RendererError::Shader {
        path: path.to_path_buf(),
        source,
    };
    let mut file = std::fs::File::open(path).map_err(shader_error)?;
    parse_spirv(&mut file).map_err(shader_error)
}

/// Shader module that lives only as long as pipeline construction needs it
pub struct ShaderModule<'a> {
    pub module: vk::ShaderModule,
    device: &'a DeviceContext,
}

impl<'a> ShaderModule<'a> {
    pub fn new(device: &'a DeviceContext, code: &[u32]) -> Result<Self> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

        let module = unsafe { device.device.create_shader_module(&create_info, None) }
            .map_err(RendererError::creation("shader module"))?;

        Ok(Self { module, device })
    }

    pub fn from_file(device: &'a DeviceContext, path: &Path) -> Result<Self> {
        log::debug!("Loading shader {:?}", path);
        Self::new(device, &load_spirv(path)?)
    }
}

impl Drop for ShaderModule<'_> {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_shader_module(self.module, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn words_to_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn accepts_spirv_header() {
        let bytes = words_to_bytes(&[SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]);
        let words = parse_spirv(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(words.len(), 5);
        assert_eq!(words[0], SPIRV_MAGIC);
    }

    #[test]
    fn swaps_big_endian_binaries() {
        let bytes: Vec<u8> = [SPIRV_MAGIC, 0x0001_0000]
            .iter()
            .flat_map(|w| w.to_be_bytes())
            .collect();
        let words = parse_spirv(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(words, vec![SPIRV_MAGIC, 0x0001_0000]);
    }

    #[test]
    fn rejects_truncated_binary() {
        let mut bytes = words_to_bytes(&[SPIRV_MAGIC, 0]);
        bytes.pop();
        assert!(parse_spirv(&mut Cursor::new(bytes)).is_err());
    }

    #[test]
    fn rejects_wrong_magic() {
        let bytes = words_to_bytes(&[0xDEAD_BEEF, 0]);
        let err = parse_spirv(&mut Cursor::new(bytes)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn rejects_empty_binary() {
        assert!(parse_spirv(&mut Cursor::new(Vec::new())).is_err());
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = load_spirv(Path::new("no/such/shader.spv")).unwrap_err();
        match err {
            RendererError::Shader { path, .. } => assert_eq!(path, Path::new("no/such/shader.spv")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
