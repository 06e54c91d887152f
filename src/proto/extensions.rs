//! Extension methods for ONNX protobuf types
//!
//! Small accessors and constructors the passes share, plus the scoping
//! rules of nested graphs (`If` branches, `Loop` and `Scan` bodies).

use indexmap::IndexSet;
use rustc_hash::FxHashSet;

use super::onnx::*;

/// Sentinel for a dimension resolved at run time
pub const DYNAMIC_DIM: i64 = -1;

// ============================================================================
// ModelProto extensions
// ============================================================================

impl ModelProto {
    /// Opset version of the default (`""` or `ai.onnx`) domain
    pub fn default_opset_version(&self) -> Option<i64> {
        self.opset_import
            .iter()
            .find(|op| op.domain().is_empty() || op.domain() == "ai.onnx")
            .map(|op| op.version())
    }
}

// ============================================================================
// NodeProto extensions
// ============================================================================

impl NodeProto {
    /// Get attribute by name
    pub fn get_attribute(&self, name: &str) -> Option<&AttributeProto> {
        self.attribute.iter().find(|attr| attr.name() == name)
    }

    /// Get mutable attribute by name
    pub fn get_attribute_mut(&mut self, name: &str) -> Option<&mut AttributeProto> {
        self.attribute.iter_mut().find(|attr| attr.name() == name)
    }

    /// Get repeated int attribute
    pub fn get_attribute_ints(&self, name: &str) -> Option<&[i64]> {
        self.get_attribute(name).map(|a| a.ints.as_slice())
    }

    /// Non-empty input at `index`
    pub fn input_at(&self, index: usize) -> Option<&str> {
        self.input
            .get(index)
            .map(String::as_str)
            .filter(|name| !name.is_empty())
    }

    /// Check if this node's op type is in the given list
    pub fn is_op_type_in(&self, op_types: &[&str]) -> bool {
        op_types.contains(&self.op_type())
    }

    /// Graphs held by `GRAPH` / `GRAPHS` attributes
    pub fn subgraphs(&self) -> impl Iterator<Item = &GraphProto> {
        self.attribute
            .iter()
            .flat_map(|attr| attr.g.iter().chain(attr.graphs.iter()))
    }

    /// Mutable access to the graphs held by attributes
    pub fn subgraphs_mut(&mut self) -> impl Iterator<Item = &mut GraphProto> {
        self.attribute
            .iter_mut()
            .flat_map(|attr| attr.g.iter_mut().chain(attr.graphs.iter_mut()))
    }

    /// Outer tensors read from inside this node's subgraphs
    ///
    /// They are inputs of the node in every respect except that they are not
    /// listed in `input`.
    pub fn implicit_inputs(&self) -> Vec<String> {
        let mut names: IndexSet<String> = IndexSet::new();
        for graph in self.subgraphs() {
            names.extend(graph.free_variables());
        }
        names.into_iter().collect()
    }

    /// Every tensor this node reads: non-empty inputs, then implicit inputs
    pub fn read_tensors(&self) -> Vec<String> {
        let mut names: IndexSet<String> = self
            .input
            .iter()
            .filter(|i| !i.is_empty())
            .cloned()
            .collect();
        names.extend(self.implicit_inputs());
        names.into_iter().collect()
    }
}

// ============================================================================
// GraphProto extensions
// ============================================================================

impl GraphProto {
    fn local_names(&self) -> FxHashSet<&str> {
        self.input
            .iter()
            .map(|vi| vi.name())
            .chain(self.initializer.iter().map(|t| t.name()))
            .chain(
                self.node
                    .iter()
                    .flat_map(|n| n.output.iter().map(String::as_str)),
            )
            .filter(|name| !name.is_empty())
            .collect()
    }

    /// Tensors this graph reads without defining them, in first-use order
    ///
    /// For a subgraph these are captures from the enclosing scopes. Graph
    /// outputs that name an outer tensor directly are included.
    pub fn free_variables(&self) -> Vec<String> {
        let local = self.local_names();
        let mut free: IndexSet<String> = IndexSet::new();

        for node in &self.node {
            for name in node.read_tensors() {
                if !local.contains(name.as_str()) {
                    free.insert(name);
                }
            }
        }
        for output in &self.output {
            if !output.name().is_empty() && !local.contains(output.name()) {
                free.insert(output.name().to_string());
            }
        }
        free.into_iter().collect()
    }

    /// Rewrite references to outer tensors, here and in nested graphs
    ///
    /// Names defined in this graph shadow `rename`. Returns the number of
    /// rewritten references.
    pub fn rename_free_variables(&mut self, rename: &dyn Fn(&str) -> Option<String>) -> usize {
        let local: FxHashSet<String> = self
            .local_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        let outer = |name: &str| {
            if name.is_empty() || local.contains(name) {
                None
            } else {
                rename(name)
            }
        };

        let mut count = 0;
        for node in self.node.iter_mut() {
            for input in node.input.iter_mut() {
                if let Some(new) = outer(input.as_str()) {
                    *input = new;
                    count += 1;
                }
            }
            for graph in node.subgraphs_mut() {
                count += graph.rename_free_variables(&outer);
            }
        }
        for output in self.output.iter_mut() {
            if let Some(new) = outer(output.name()) {
                output.name = Some(new);
                count += 1;
            }
        }
        count
    }
}

// ============================================================================
// ValueInfoProto extensions
// ============================================================================

impl ValueInfoProto {
    fn tensor_type(&self) -> Option<&type_proto::Tensor> {
        match self.r#type.as_ref()?.value.as_ref()? {
            type_proto::Value::TensorType(tensor) => Some(tensor),
            _ => None,
        }
    }

    /// Declared dimensions; symbolic or missing dims map to [`DYNAMIC_DIM`]
    pub fn get_shape(&self) -> Option<Vec<i64>> {
        let shape = self.tensor_type()?.shape.as_ref()?;
        Some(
            shape
                .dim
                .iter()
                .map(|d| match &d.value {
                    Some(tensor_shape_proto::dimension::Value::DimValue(v)) => *v,
                    _ => DYNAMIC_DIM,
                })
                .collect(),
        )
    }

    /// Declared dimension objects, keeping symbolic names
    pub fn get_dims(&self) -> Option<&[tensor_shape_proto::Dimension]> {
        self.tensor_type()?
            .shape
            .as_ref()
            .map(|s| s.dim.as_slice())
    }

    /// Get the element type if this is a tensor type
    pub fn get_elem_type(&self) -> Option<i32> {
        self.tensor_type().map(|t| t.elem_type())
    }

    /// Replace the declared tensor shape, keeping the element type
    pub fn set_dims(&mut self, dims: Vec<tensor_shape_proto::Dimension>) {
        let elem_type = self
            .get_elem_type()
            .unwrap_or(tensor_proto::DataType::Float as i32);
        let denotation = self.r#type.as_ref().and_then(|t| t.denotation.clone());

        self.r#type = Some(TypeProto {
            value: Some(type_proto::Value::TensorType(type_proto::Tensor {
                elem_type: Some(elem_type),
                shape: Some(TensorShapeProto { dim: dims }),
            })),
            denotation,
        });
    }
}

/// Concrete dimension
pub fn dim_value(value: i64) -> tensor_shape_proto::Dimension {
    tensor_shape_proto::Dimension {
        value: Some(tensor_shape_proto::dimension::Value::DimValue(value)),
        denotation: None,
    }
}

/// Symbolic dimension
pub fn dim_param(param: &str) -> tensor_shape_proto::Dimension {
    tensor_shape_proto::Dimension {
        value: Some(tensor_shape_proto::dimension::Value::DimParam(
            param.to_string(),
        )),
        denotation: None,
    }
}

// ============================================================================
// AttributeProto extensions
// ============================================================================

impl AttributeProto {
    /// Create a new integer attribute
    pub fn new_int(name: &str, value: i64) -> Self {
        Self {
            name: Some(name.to_string()),
            i: Some(value),
            r#type: Some(attribute_proto::AttributeType::Int as i32),
            ..Default::default()
        }
    }

    /// Create a new float attribute
    pub fn new_float(name: &str, value: f32) -> Self {
        Self {
            name: Some(name.to_string()),
            f: Some(value),
            r#type: Some(attribute_proto::AttributeType::Float as i32),
            ..Default::default()
        }
    }

    /// Create a new ints attribute
    pub fn new_ints(name: &str, values: Vec<i64>) -> Self {
        Self {
            name: Some(name.to_string()),
            ints: values,
            r#type: Some(attribute_proto::AttributeType::Ints as i32),
            ..Default::default()
        }
    }

    /// Create a new graph attribute
    pub fn new_graph(name: &str, graph: GraphProto) -> Self {
        Self {
            name: Some(name.to_string()),
            g: Some(graph),
            r#type: Some(attribute_proto::AttributeType::Graph as i32),
            ..Default::default()
        }
    }
}

// ============================================================================
// Helper functions
// ============================================================================

/// Create a new ValueInfoProto for a tensor.
///
/// Negative dims are written as unnamed dynamic dimensions.
pub fn make_tensor_value_info(name: &str, elem_type: i32, shape: &[i64]) -> ValueInfoProto {
    let mut vi = ValueInfoProto {
        name: Some(name.to_string()),
        ..Default::default()
    };
    vi.r#type = Some(TypeProto {
        value: Some(type_proto::Value::TensorType(type_proto::Tensor {
            elem_type: Some(elem_type),
            shape: None,
        })),
        denotation: None,
    });
    vi.set_dims(
        shape
            .iter()
            .map(|&d| {
                if d < 0 {
                    tensor_shape_proto::Dimension::default()
                } else {
                    dim_value(d)
                }
            })
            .collect(),
    );
    vi
}

/// Create a new NodeProto; an empty `name` leaves the field unset
pub fn make_node(op_type: &str, inputs: &[&str], outputs: &[&str], name: &str) -> NodeProto {
    NodeProto {
        op_type: Some(op_type.to_string()),
        input: inputs.iter().map(|s| s.to_string()).collect(),
        output: outputs.iter().map(|s| s.to_string()).collect(),
        name: (!name.is_empty()).then(|| name.to_string()),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_get_attribute() {
        let mut node = NodeProto::default();
        node.attribute.push(AttributeProto::new_ints("axes", vec![-1]));

        assert_eq!(node.get_attribute_ints("axes"), Some(&[-1][..]));
        assert!(node.get_attribute("missing").is_none());
    }

    #[test]
    fn test_make_tensor_value_info() {
        let vi = make_tensor_value_info("test", 1, &[1, 3, 224, 224]);
        assert_eq!(vi.name(), "test");
        assert_eq!(vi.get_shape(), Some(vec![1, 3, 224, 224]));
        assert_eq!(vi.get_elem_type(), Some(1));
    }

    #[test]
    fn test_dynamic_dims() {
        let mut vi = make_tensor_value_info("x", 1, &[-1, 8]);
        assert_eq!(vi.get_shape(), Some(vec![DYNAMIC_DIM, 8]));

        vi.set_dims(vec![dim_param("N"), dim_value(8)]);
        assert_eq!(vi.get_shape(), Some(vec![DYNAMIC_DIM, 8]));
        assert_eq!(vi.get_elem_type(), Some(1));
    }

    #[test]
    fn test_input_at_skips_empty() {
        let node = make_node("Conv", &["X", "W", ""], &["Y"], "conv_0");
        assert_eq!(node.input_at(1), Some("W"));
        assert_eq!(node.input_at(2), None);
        assert_eq!(node.input_at(3), None);
    }

    #[test]
    fn test_default_opset_version() {
        let model = ModelProto {
            opset_import: vec![
                OperatorSetIdProto {
                    domain: Some("com.microsoft".to_string()),
                    version: Some(1),
                },
                OperatorSetIdProto {
                    domain: None,
                    version: Some(13),
                },
            ],
            ..Default::default()
        };
        assert_eq!(model.default_opset_version(), Some(13));
    }

    fn branch(nodes: Vec<NodeProto>, output: &str) -> GraphProto {
        GraphProto {
            node: nodes,
            output: vec![make_tensor_value_info(output, 1, &[1])],
            ..Default::default()
        }
    }

    #[test]
    fn test_implicit_inputs() {
        let mut node = make_node("If", &["cond"], &["y"], "if_0");
        node.attribute.push(AttributeProto::new_graph(
            "then_branch",
            branch(vec![make_node("Add", &["a", "t"], &["t_out"], "then_add")], "t_out"),
        ));
        node.attribute.push(AttributeProto::new_graph("else_branch", branch(vec![], "b")));
        // neither "a" nor "t" is defined inside the branch
        assert_eq!(node.implicit_inputs(), vec!["a", "t", "b"]);
        assert_eq!(node.read_tensors(), vec!["cond", "a", "t", "b"]);
    }

    #[test]
    fn test_nested_captures_and_shadowing() {
        let inner = branch(vec![make_node("Relu", &["outer", "local"], &["r"], "r_0")], "r");
        let mut loop_node = make_node("Loop", &["", ""], &["z"], "loop_0");
        loop_node.attribute.push(AttributeProto::new_graph("body", inner));

        let mut outer_branch = branch(
            vec![
                make_node("Identity", &["x"], &["local"], "id_0"),
                loop_node,
            ],
            "z",
        );
        assert_eq!(outer_branch.free_variables(), vec!["x", "outer"]);

        let renamed = outer_branch.rename_free_variables(&|name| Some(format!("{}_new", name)));
        assert_eq!(renamed, 2);
        assert_eq!(outer_branch.node[0].input, vec!["x_new"]);
        let body = outer_branch.node[1].subgraphs().next().unwrap();
        // "local" is defined by the enclosing branch and keeps its name
        assert_eq!(body.node[0].input, vec!["outer_new", "local"]);
    }
}
