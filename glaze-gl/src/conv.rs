//! Conversions between core renderer types and GL constants.

use gl::types::*;
use glaze::blending::{Equation, Factor};
use glaze::buffer::{BufferTarget, BufferUsage, IndexFormat};
use glaze::depth_test::DepthComparison;
use glaze::face_culling::FaceCullingMode;
use glaze::framebuffer::Attachment;
use glaze::shader::UniformType;
use glaze::texture::{MagFilter, MinFilter, PixelFormat, TextureKind, Wrap};
use glaze::vertex_array::{AttributeType, Primitive};

pub(crate) fn blending_equation_to_glenum(e: Equation) -> GLenum {
  match e {
    Equation::Additive => gl::FUNC_ADD,
    Equation::Subtract => gl::FUNC_SUBTRACT,
    Equation::ReverseSubtract => gl::FUNC_REVERSE_SUBTRACT,
    Equation::Min => gl::MIN,
    Equation::Max => gl::MAX,
  }
}

pub(crate) fn blending_factor_to_glenum(f: Factor) -> GLenum {
  match f {
    Factor::One => gl::ONE,
    Factor::Zero => gl::ZERO,
    Factor::SrcColor => gl::SRC_COLOR,
    Factor::SrcColorComplement => gl::ONE_MINUS_SRC_COLOR,
    Factor::DstColor => gl::DST_COLOR,
    Factor::DstColorComplement => gl::ONE_MINUS_DST_COLOR,
    Factor::SrcAlpha => gl::SRC_ALPHA,
    Factor::SrcAlphaComplement => gl::ONE_MINUS_SRC_ALPHA,
    Factor::DstAlpha => gl::DST_ALPHA,
    Factor::DstAlphaComplement => gl::ONE_MINUS_DST_ALPHA,
  }
}

pub(crate) fn depth_comparison_to_glenum(cmp: DepthComparison) -> GLenum {
  match cmp {
    DepthComparison::Never => gl::NEVER,
    DepthComparison::Always => gl::ALWAYS,
    DepthComparison::Equal => gl::EQUAL,
    DepthComparison::NotEqual => gl::NOTEQUAL,
    DepthComparison::Less => gl::LESS,
    DepthComparison::LessOrEqual => gl::LEQUAL,
    DepthComparison::Greater => gl::GREATER,
    DepthComparison::GreaterOrEqual => gl::GEQUAL,
  }
}

pub(crate) fn face_culling_mode_to_glenum(mode: FaceCullingMode) -> GLenum {
  match mode {
    FaceCullingMode::Front => gl::FRONT,
    FaceCullingMode::Back => gl::BACK,
    FaceCullingMode::Both => gl::FRONT_AND_BACK,
  }
}

pub(crate) fn primitive_to_glenum(p: Primitive) -> GLenum {
  match p {
    Primitive::Points => gl::POINTS,
    Primitive::Lines => gl::LINES,
    Primitive::LineStrip => gl::LINE_STRIP,
    Primitive::LineLoop => gl::LINE_LOOP,
    Primitive::Triangles => gl::TRIANGLES,
    Primitive::TriangleStrip => gl::TRIANGLE_STRIP,
  }
}

pub(crate) fn texture_target_to_glenum(kind: TextureKind) -> GLenum {
  match kind {
    TextureKind::TwoD => gl::TEXTURE_2D,
    TextureKind::CubeMap => gl::TEXTURE_CUBE_MAP,
  }
}

/// The image target for one layer of a texture; cube maps address a face per layer.
pub(crate) fn image_target_to_glenum(kind: TextureKind, layer: u32) -> GLenum {
  match kind {
    TextureKind::TwoD => gl::TEXTURE_2D,
    TextureKind::CubeMap => gl::TEXTURE_CUBE_MAP_POSITIVE_X + layer,
  }
}

pub(crate) fn min_filter_to_glenum(f: MinFilter) -> GLenum {
  match f {
    MinFilter::Nearest => gl::NEAREST,
    MinFilter::Linear => gl::LINEAR,
    MinFilter::NearestMipmapNearest => gl::NEAREST_MIPMAP_NEAREST,
    MinFilter::NearestMipmapLinear => gl::NEAREST_MIPMAP_LINEAR,
    MinFilter::LinearMipmapNearest => gl::LINEAR_MIPMAP_NEAREST,
    MinFilter::LinearMipmapLinear => gl::LINEAR_MIPMAP_LINEAR,
  }
}

pub(crate) fn mag_filter_to_glenum(f: MagFilter) -> GLenum {
  match f {
    MagFilter::Nearest => gl::NEAREST,
    MagFilter::Linear => gl::LINEAR,
  }
}

pub(crate) fn wrap_to_glenum(w: Wrap) -> GLenum {
  match w {
    Wrap::ClampToEdge => gl::CLAMP_TO_EDGE,
    Wrap::Repeat => gl::REPEAT,
    Wrap::MirroredRepeat => gl::MIRRORED_REPEAT,
  }
}

pub(crate) fn buffer_target_to_glenum(target: BufferTarget) -> GLenum {
  match target {
    BufferTarget::Array => gl::ARRAY_BUFFER,
    BufferTarget::ElementArray => gl::ELEMENT_ARRAY_BUFFER,
    BufferTarget::PixelUnpack => gl::PIXEL_UNPACK_BUFFER,
    BufferTarget::PixelPack => gl::PIXEL_PACK_BUFFER,
  }
}

pub(crate) fn buffer_usage_to_glenum(usage: BufferUsage) -> GLenum {
  match usage {
    BufferUsage::Static => gl::STATIC_DRAW,
    BufferUsage::Dynamic => gl::DYNAMIC_DRAW,
    BufferUsage::Stream => gl::STREAM_DRAW,
    BufferUsage::StreamRead => gl::STREAM_READ,
  }
}

pub(crate) fn index_format_to_glenum(format: IndexFormat) -> GLenum {
  match format {
    IndexFormat::U16 => gl::UNSIGNED_SHORT,
    IndexFormat::U32 => gl::UNSIGNED_INT,
  }
}

pub(crate) fn attachment_to_glenum(slot: Attachment) -> GLenum {
  match slot {
    Attachment::Depth => gl::DEPTH_ATTACHMENT,
    Attachment::Color0 => gl::COLOR_ATTACHMENT0,
    Attachment::Color1 => gl::COLOR_ATTACHMENT1,
    Attachment::Color2 => gl::COLOR_ATTACHMENT2,
    Attachment::Color3 => gl::COLOR_ATTACHMENT3,
  }
}

pub(crate) fn attribute_type_to_glenum(ty: AttributeType) -> GLenum {
  match ty {
    AttributeType::U8 => gl::UNSIGNED_BYTE,
    AttributeType::I8 => gl::BYTE,
    AttributeType::U16 => gl::UNSIGNED_SHORT,
    AttributeType::I16 => gl::SHORT,
    AttributeType::U32 => gl::UNSIGNED_INT,
    AttributeType::I32 => gl::INT,
    AttributeType::F32 => gl::FLOAT,
  }
}

/// `(internal format, pixel format, scalar type)` for a core pixel format.
pub(crate) fn pixel_format_to_gl(format: PixelFormat) -> (GLenum, GLenum, GLenum) {
  match format {
    PixelFormat::R8 => (gl::R8, gl::RED, gl::UNSIGNED_BYTE),
    PixelFormat::Rg8 => (gl::RG8, gl::RG, gl::UNSIGNED_BYTE),
    PixelFormat::Rgb8 => (gl::RGB8, gl::RGB, gl::UNSIGNED_BYTE),
    PixelFormat::Rgba8 => (gl::RGBA8, gl::RGBA, gl::UNSIGNED_BYTE),
    PixelFormat::Depth16 => (gl::DEPTH_COMPONENT16, gl::DEPTH_COMPONENT, gl::UNSIGNED_SHORT),
  }
}

/// The uniform type for a reflected GL type, `None` for types the renderer does not handle.
pub(crate) fn glenum_to_uniform_type(ty: GLenum) -> Option<UniformType> {
  match ty {
    gl::FLOAT => Some(UniformType::Float),
    gl::FLOAT_VEC2 => Some(UniformType::Vec2),
    gl::FLOAT_VEC3 => Some(UniformType::Vec3),
    gl::FLOAT_VEC4 => Some(UniformType::Vec4),
    gl::INT => Some(UniformType::Int),
    gl::INT_VEC2 => Some(UniformType::IVec2),
    gl::INT_VEC3 => Some(UniformType::IVec3),
    gl::INT_VEC4 => Some(UniformType::IVec4),
    gl::FLOAT_MAT3 => Some(UniformType::Mat3),
    gl::FLOAT_MAT4 => Some(UniformType::Mat4),
    gl::SAMPLER_2D => Some(UniformType::Sampler2D),
    gl::SAMPLER_CUBE => Some(UniformType::SamplerCube),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn every_handled_uniform_type_reflects() {
    let known = [
      (gl::FLOAT, UniformType::Float),
      (gl::FLOAT_VEC2, UniformType::Vec2),
      (gl::FLOAT_VEC3, UniformType::Vec3),
      (gl::FLOAT_VEC4, UniformType::Vec4),
      (gl::INT, UniformType::Int),
      (gl::INT_VEC2, UniformType::IVec2),
      (gl::INT_VEC3, UniformType::IVec3),
      (gl::INT_VEC4, UniformType::IVec4),
      (gl::FLOAT_MAT3, UniformType::Mat3),
      (gl::FLOAT_MAT4, UniformType::Mat4),
      (gl::SAMPLER_2D, UniformType::Sampler2D),
      (gl::SAMPLER_CUBE, UniformType::SamplerCube),
    ];
    for (glenum, ty) in known {
      assert_eq!(glenum_to_uniform_type(glenum), Some(ty));
    }

    // Types the core cannot upload reflect as unknown, not as an error.
    assert_eq!(glenum_to_uniform_type(gl::BOOL), None);
    assert_eq!(glenum_to_uniform_type(gl::FLOAT_MAT2), None);
  }

  #[test]
  fn depth_formats_route_to_the_depth_pixel_format() {
    let formats = [
      PixelFormat::R8,
      PixelFormat::Rg8,
      PixelFormat::Rgb8,
      PixelFormat::Rgba8,
      PixelFormat::Depth16,
    ];
    for f in formats {
      let (_, format, _) = pixel_format_to_gl(f);
      assert_eq!(f.is_depth(), format == gl::DEPTH_COMPONENT, "{:?}", f);
    }
  }

  #[test]
  fn color_attachments_are_contiguous() {
    assert_eq!(attachment_to_glenum(Attachment::Depth), gl::DEPTH_ATTACHMENT);
    for (i, slot) in [
      Attachment::Color0,
      Attachment::Color1,
      Attachment::Color2,
      Attachment::Color3,
    ]
    .into_iter()
    .enumerate()
    {
      assert_eq!(attachment_to_glenum(slot), gl::COLOR_ATTACHMENT0 + i as GLenum);
    }
  }

  #[test]
  fn cube_faces_step_from_positive_x() {
    assert_eq!(image_target_to_glenum(TextureKind::TwoD, 0), gl::TEXTURE_2D);
    for layer in 0..6 {
      assert_eq!(
        image_target_to_glenum(TextureKind::CubeMap, layer),
        gl::TEXTURE_CUBE_MAP_POSITIVE_X + layer
      );
    }
  }
}
