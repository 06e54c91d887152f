//! ONNX Protocol Buffer types
//!
//! This module re-exports the types `prost-build` generates from
//! `proto/onnx.proto`. Helper methods on those types live in [`extensions`].

/// Generated ONNX protobuf types
#[allow(missing_docs)]
#[allow(clippy::all)]
pub mod onnx {
    include!(concat!(env!("OUT_DIR"), "/onnx.rs"));
}

pub use onnx::{
    AttributeProto, GraphProto, ModelProto, NodeProto, OperatorSetIdProto, TensorProto,
    TensorShapeProto, TypeProto, ValueInfoProto,
};

pub use onnx::attribute_proto;
pub use onnx::tensor_proto;
pub use onnx::tensor_shape_proto;
pub use onnx::type_proto;

/// Extension methods for ONNX protobuf types
pub mod extensions;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_proto_default() {
        let model = ModelProto::default();
        assert_eq!(model.ir_version, None);
        assert_eq!(model.ir_version(), 0);
        assert!(model.graph.is_none());
    }

    #[test]
    fn test_attribute_type_field() {
        let mut attr = AttributeProto::default();
        assert_eq!(attr.r#type(), attribute_proto::AttributeType::Undefined);

        attr.set_type(attribute_proto::AttributeType::Ints);
        assert_eq!(attr.r#type, Some(7));
    }

    #[test]
    fn test_explicit_default_kept() {
        use prost::Message;

        // an explicitly written zero survives a decode/encode cycle
        let attr = AttributeProto {
            name: Some("axis".to_string()),
            i: Some(0),
            ..Default::default()
        };
        let bytes = attr.encode_to_vec();
        assert_eq!(AttributeProto::decode(bytes.as_slice()).unwrap(), attr);
        assert_eq!(bytes, vec![0x0a, 0x04, b'a', b'x', b'i', b's', 0x18, 0x00]);
    }
}
