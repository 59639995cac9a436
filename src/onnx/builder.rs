//! Incremental ONNX graph construction
//!
//! [`GraphBuilder`] hands out unique value names for every node it appends,
//! stores weights as initializers (once per name, so shared layers are
//! serialized a single time) and assembles the final [`GraphProto`].

use super::proto::{
    attribute_type, data_type, AttributeProto, Dim, GraphProto, NodeProto, TensorProto,
    ValueInfoProto,
};
use crate::error::Result;
use candle_core::{DType, Tensor};
use std::collections::HashSet;

pub fn attr_int(name: &str, value: i64) -> AttributeProto {
    AttributeProto {
        name: name.to_string(),
        r#type: attribute_type::INT,
        i: value,
        ..Default::default()
    }
}

pub fn attr_ints(name: &str, values: &[i64]) -> AttributeProto {
    AttributeProto {
        name: name.to_string(),
        r#type: attribute_type::INTS,
        ints: values.to_vec(),
        ..Default::default()
    }
}

pub fn attr_float(name: &str, value: f32) -> AttributeProto {
    AttributeProto {
        name: name.to_string(),
        r#type: attribute_type::FLOAT,
        f: value,
        ..Default::default()
    }
}

pub fn attr_tensor(name: &str, tensor: TensorProto) -> AttributeProto {
    AttributeProto {
        name: name.to_string(),
        r#type: attribute_type::TENSOR,
        t: Some(tensor),
        ..Default::default()
    }
}

fn f32_tensor(name: String, values: &[f32], dims: &[i64]) -> TensorProto {
    TensorProto {
        name,
        dims: dims.to_vec(),
        data_type: data_type::FLOAT,
        raw_data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        ..Default::default()
    }
}

fn i64_tensor(name: String, values: &[i64], dims: &[i64]) -> TensorProto {
    TensorProto {
        name,
        dims: dims.to_vec(),
        data_type: data_type::INT64,
        raw_data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        ..Default::default()
    }
}

#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: Vec<NodeProto>,
    initializers: Vec<TensorProto>,
    initializer_names: HashSet<String>,
    inputs: Vec<ValueInfoProto>,
    outputs: Vec<ValueInfoProto>,
    counter: usize,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh(&mut self, stem: &str) -> String {
        self.counter += 1;
        format!("{}_{}", stem, self.counter)
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_initializers(&self) -> usize {
        self.initializers.len()
    }

    /// Declare a graph input and return its value name.
    pub fn input(&mut self, name: &str, elem_type: i32, dims: &[Dim]) -> String {
        self.inputs
            .push(ValueInfoProto::tensor(name, elem_type, dims));
        name.to_string()
    }

    /// Expose `value` as graph output `name`.
    pub fn output(&mut self, value: &str, name: &str, elem_type: i32, dims: &[Dim]) {
        self.nodes.push(NodeProto {
            input: vec![value.to_string()],
            output: vec![name.to_string()],
            name: format!("{}_identity", name),
            op_type: "Identity".to_string(),
            ..Default::default()
        });
        self.outputs
            .push(ValueInfoProto::tensor(name, elem_type, dims));
    }

    /// Store a model parameter as an f32 initializer named `name`.
    ///
    /// Repeated calls with the same name reuse the first initializer.
    pub fn weight(&mut self, name: &str, tensor: &Tensor) -> Result<String> {
        if self.initializer_names.contains(name) {
            return Ok(name.to_string());
        }
        let dims: Vec<i64> = tensor.dims().iter().map(|&d| d as i64).collect();
        let values = tensor.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
        self.initializers
            .push(f32_tensor(name.to_string(), &values, &dims));
        self.initializer_names.insert(name.to_string());
        Ok(name.to_string())
    }

    /// Anonymous f32 constant.
    pub fn const_f32(&mut self, values: &[f32], dims: &[i64]) -> String {
        let name = self.fresh("const");
        self.initializers
            .push(f32_tensor(name.clone(), values, dims));
        self.initializer_names.insert(name.clone());
        name
    }

    pub fn scalar_f32(&mut self, value: f32) -> String {
        self.const_f32(&[value], &[])
    }

    /// Anonymous 1-D i64 constant (shapes, axes, slice bounds).
    pub fn const_i64(&mut self, values: &[i64]) -> String {
        let name = self.fresh("const");
        self.initializers
            .push(i64_tensor(name.clone(), values, &[values.len() as i64]));
        self.initializer_names.insert(name.clone());
        name
    }

    pub fn scalar_i64(&mut self, value: i64) -> String {
        let name = self.fresh("const");
        self.initializers
            .push(i64_tensor(name.clone(), &[value], &[]));
        self.initializer_names.insert(name.clone());
        name
    }

    /// Append a single-output node and return its output name.
    pub fn node(&mut self, op_type: &str, inputs: &[&str], attribute: Vec<AttributeProto>) -> String {
        let name = self.fresh(op_type);
        let output = format!("{}_out", name);
        self.nodes.push(NodeProto {
            input: inputs.iter().map(|s| s.to_string()).collect(),
            output: vec![output.clone()],
            name,
            op_type: op_type.to_string(),
            attribute,
            ..Default::default()
        });
        output
    }

    pub fn add(&mut self, a: &str, b: &str) -> String {
        self.node("Add", &[a, b], vec![])
    }

    pub fn sub(&mut self, a: &str, b: &str) -> String {
        self.node("Sub", &[a, b], vec![])
    }

    pub fn mul(&mut self, a: &str, b: &str) -> String {
        self.node("Mul", &[a, b], vec![])
    }

    pub fn div(&mut self, a: &str, b: &str) -> String {
        self.node("Div", &[a, b], vec![])
    }

    pub fn matmul(&mut self, a: &str, b: &str) -> String {
        self.node("MatMul", &[a, b], vec![])
    }

    pub fn unary(&mut self, op_type: &str, x: &str) -> String {
        self.node(op_type, &[x], vec![])
    }

    pub fn leaky_relu(&mut self, x: &str, alpha: f32) -> String {
        self.node("LeakyRelu", &[x], vec![attr_float("alpha", alpha)])
    }

    pub fn transpose(&mut self, x: &str, perm: &[i64]) -> String {
        self.node("Transpose", &[x], vec![attr_ints("perm", perm)])
    }

    pub fn unsqueeze(&mut self, x: &str, axes: &[i64]) -> String {
        let axes = self.const_i64(axes);
        self.node("Unsqueeze", &[x, &axes], vec![])
    }

    pub fn squeeze(&mut self, x: &str, axes: &[i64]) -> String {
        let axes = self.const_i64(axes);
        self.node("Squeeze", &[x, &axes], vec![])
    }

    pub fn reshape(&mut self, x: &str, shape: &[i64]) -> String {
        let shape = self.const_i64(shape);
        self.node("Reshape", &[x, &shape], vec![])
    }

    pub fn concat(&mut self, values: &[&str], axis: i64) -> String {
        self.node("Concat", values, vec![attr_int("axis", axis)])
    }

    /// Slice along `axes` with static bounds (negative ends count from the back).
    pub fn slice(&mut self, x: &str, starts: &[i64], ends: &[i64], axes: &[i64]) -> String {
        let starts = self.const_i64(starts);
        let ends = self.const_i64(ends);
        let axes = self.const_i64(axes);
        self.node("Slice", &[x, &starts, &ends, &axes], vec![])
    }

    pub fn cast(&mut self, x: &str, to: i32) -> String {
        self.node("Cast", &[x], vec![attr_int("to", to as i64)])
    }

    /// Assemble the graph.
    pub fn build(self, name: &str) -> GraphProto {
        GraphProto {
            node: self.nodes,
            name: name.to_string(),
            initializer: self.initializers,
            input: self.inputs,
            output: self.outputs,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_node_outputs_are_unique() {
        let mut g = GraphBuilder::new();
        let x = g.input("x", data_type::FLOAT, &[Dim::Fixed(1)]);
        let a = g.unary("Relu", &x);
        let b = g.unary("Relu", &x);
        assert_ne!(a, b);
        assert_eq!(g.num_nodes(), 2);
    }

    #[test]
    fn test_weight_is_stored_once() {
        let mut g = GraphBuilder::new();
        let w = Tensor::ones((2, 3), DType::F32, &Device::Cpu).unwrap();
        let first = g.weight("bert.ffn.weight", &w).unwrap();
        let second = g.weight("bert.ffn.weight", &w).unwrap();
        assert_eq!(first, second);
        assert_eq!(g.num_initializers(), 1);

        let graph = g.build("test");
        assert_eq!(graph.initializer[0].dims, vec![2, 3]);
        assert_eq!(graph.initializer[0].raw_data.len(), 24);
    }

    #[test]
    fn test_output_adds_identity() {
        let mut g = GraphBuilder::new();
        let x = g.input("x", data_type::FLOAT, &[Dim::Fixed(1)]);
        let y = g.unary("Exp", &x);
        g.output(&y, "y", data_type::FLOAT, &[Dim::Fixed(1)]);
        let graph = g.build("test");
        let last = graph.node.last().unwrap();
        assert_eq!(last.op_type, "Identity");
        assert_eq!(last.output, vec!["y".to_string()]);
        assert_eq!(graph.output[0].name, "y");
    }
}
