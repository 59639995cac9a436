//! Structural validation of decoded ONNX models
//!
//! Not a full shape-inference pass: it checks the parts an exporter can get
//! wrong on its own. That covers versions, the exact I/O signature,
//! topological edge order, unique value names, initializer sizes and the op
//! set the runtime must provide.

use super::export::{AUDIO, INPUT_IDS, INPUT_IDS_LEN, NUM_SAMPLES, SPEED, STYLE};
use super::proto::{data_type, Dim, GraphProto, ModelProto, ValueInfoProto};
use super::{IR_VERSION, OPSET_VERSION};
use crate::error::{Error, Result};
use crate::models::KokoroConfig;
use std::collections::HashSet;

/// Default-domain operators the exported graph may use.
pub const KNOWN_OPS: &[&str] = &[
    "Add",
    "And",
    "Cast",
    "Concat",
    "ConstantOfShape",
    "Conv",
    "ConvTranspose",
    "Cos",
    "CumSum",
    "Div",
    "Exp",
    "Gather",
    "GreaterOrEqual",
    "Identity",
    "InstanceNormalization",
    "LayerNormalization",
    "LeakyRelu",
    "Less",
    "MatMul",
    "Max",
    "Mul",
    "Range",
    "ReduceSum",
    "Relu",
    "Reshape",
    "Round",
    "Shape",
    "Sigmoid",
    "Sin",
    "Slice",
    "Softmax",
    "Squeeze",
    "Sub",
    "Tanh",
    "Tile",
    "Transpose",
    "Unsqueeze",
];

/// Expected name, element type and dims of one graph input or output.
#[derive(Debug, Clone, PartialEq)]
pub struct IoSpec {
    pub name: String,
    pub elem_type: i32,
    pub dims: Vec<Dim>,
}

impl IoSpec {
    pub fn new(name: &str, elem_type: i32, dims: Vec<Dim>) -> Self {
        Self {
            name: name.to_string(),
            elem_type,
            dims,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GraphChecker {
    inputs: Vec<IoSpec>,
    outputs: Vec<IoSpec>,
    ir_version: i64,
    opset_version: i64,
}

fn fail<T>(msg: impl Into<String>) -> Result<T> {
    Err(Error::validation(msg))
}

impl GraphChecker {
    pub fn new(inputs: Vec<IoSpec>, outputs: Vec<IoSpec>) -> Self {
        Self {
            inputs,
            outputs,
            ir_version: IR_VERSION,
            opset_version: OPSET_VERSION,
        }
    }

    /// The Kokoro inference signature for a given style width.
    pub fn kokoro(style_len: usize) -> Self {
        Self::new(
            vec![
                IoSpec::new(
                    INPUT_IDS,
                    data_type::INT64,
                    vec![Dim::Fixed(1), Dim::Param(INPUT_IDS_LEN.into())],
                ),
                IoSpec::new(
                    STYLE,
                    data_type::FLOAT,
                    vec![Dim::Fixed(1), Dim::Fixed(style_len as i64)],
                ),
                IoSpec::new(SPEED, data_type::INT32, vec![Dim::Fixed(1)]),
            ],
            vec![IoSpec::new(
                AUDIO,
                data_type::FLOAT,
                vec![Dim::Fixed(1), Dim::Param(NUM_SAMPLES.into())],
            )],
        )
    }

    pub fn for_config(config: &KokoroConfig) -> Self {
        Self::kokoro(config.style_len())
    }

    pub fn check(&self, model: &ModelProto) -> Result<()> {
        let graph = match &model.graph {
            Some(graph) => graph,
            None => return fail("model has no graph"),
        };
        self.check_versions(model)?;
        check_signature("input", &graph.input, &self.inputs)?;
        check_signature("output", &graph.output, &self.outputs)?;
        check_initializers(graph)?;
        check_nodes(graph)?;
        Ok(())
    }

    fn check_versions(&self, model: &ModelProto) -> Result<()> {
        if model.ir_version != self.ir_version {
            return fail(format!(
                "ir_version {} (expected {})",
                model.ir_version, self.ir_version
            ));
        }
        let opset = model
            .opset_import
            .iter()
            .find(|o| o.domain.is_empty() || o.domain == "ai.onnx")
            .map(|o| o.version);
        match opset {
            Some(v) if v == self.opset_version => Ok(()),
            Some(v) => fail(format!(
                "default opset {} (expected {})",
                v, self.opset_version
            )),
            None => fail("no default-domain opset import"),
        }
    }
}

fn check_signature(kind: &str, actual: &[ValueInfoProto], expected: &[IoSpec]) -> Result<()> {
    if actual.len() != expected.len() {
        let names: Vec<&str> = actual.iter().map(|v| v.name.as_str()).collect();
        return fail(format!(
            "graph has {} {}s {:?}, expected {}",
            actual.len(),
            kind,
            names,
            expected.len()
        ));
    }
    for (value, spec) in actual.iter().zip(expected) {
        if value.name != spec.name {
            return fail(format!(
                "{} '{}' where '{}' was expected",
                kind, value.name, spec.name
            ));
        }
        let (elem_type, dims) = value
            .tensor_signature()
            .ok_or_else(|| Error::validation(format!("{} '{}' is not a tensor", kind, value.name)))?;
        if elem_type != spec.elem_type || dims != spec.dims {
            return fail(format!(
                "{} '{}' has type {} dims {:?}, expected type {} dims {:?}",
                kind, value.name, elem_type, dims, spec.elem_type, spec.dims
            ));
        }
    }
    Ok(())
}

fn check_initializers(graph: &GraphProto) -> Result<()> {
    let mut seen = HashSet::new();
    for init in &graph.initializer {
        if !seen.insert(init.name.as_str()) {
            return fail(format!("duplicate initializer '{}'", init.name));
        }
        match init.stored_len() {
            Some(len) if len == init.numel() => {}
            Some(len) => {
                return fail(format!(
                    "initializer '{}' stores {} values for dims {:?}",
                    init.name, len, init.dims
                ))
            }
            None => {
                return fail(format!(
                    "initializer '{}' has unsupported data type {}",
                    init.name, init.data_type
                ))
            }
        }
    }
    Ok(())
}

/// Every consumed value must be defined before use; every value is defined once.
fn check_nodes(graph: &GraphProto) -> Result<()> {
    let mut defined: HashSet<&str> = graph.input.iter().map(|v| v.name.as_str()).collect();
    for init in &graph.initializer {
        if !defined.insert(init.name.as_str()) {
            return fail(format!("initializer '{}' shadows a graph input", init.name));
        }
    }

    for node in &graph.node {
        if !node.domain.is_empty() && node.domain != "ai.onnx" {
            return fail(format!(
                "node '{}' uses custom domain '{}'",
                node.name, node.domain
            ));
        }
        if !KNOWN_OPS.contains(&node.op_type.as_str()) {
            return fail(format!(
                "node '{}' uses unsupported op '{}'",
                node.name, node.op_type
            ));
        }
        // empty names mark omitted optional inputs
        if let Some(missing) = node
            .input
            .iter()
            .find(|i| !i.is_empty() && !defined.contains(i.as_str()))
        {
            return fail(format!(
                "node '{}' ({}) consumes undefined value '{}'",
                node.name, node.op_type, missing
            ));
        }
        for output in &node.output {
            if !defined.insert(output.as_str()) {
                return fail(format!(
                    "value '{}' is produced more than once (node '{}')",
                    output, node.name
                ));
            }
        }
    }

    if let Some(output) = graph
        .output
        .iter()
        .find(|o| !defined.contains(o.name.as_str()))
    {
        return fail(format!("graph output '{}' is never produced", output.name));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onnx::builder::GraphBuilder;
    use crate::onnx::proto::{NodeProto, OperatorSetIdProto};

    /// `audio = Identity(Cast(Slice(style)))`: a valid graph with the Kokoro signature.
    fn valid_model() -> ModelProto {
        let mut g = GraphBuilder::new();
        g.input(
            INPUT_IDS,
            data_type::INT64,
            &[Dim::Fixed(1), Dim::Param(INPUT_IDS_LEN.into())],
        );
        let style = g.input(STYLE, data_type::FLOAT, &[Dim::Fixed(1), Dim::Fixed(8)]);
        g.input(SPEED, data_type::INT32, &[Dim::Fixed(1)]);
        let half = g.slice(&style, &[0], &[4], &[1]);
        g.output(
            &half,
            AUDIO,
            data_type::FLOAT,
            &[Dim::Fixed(1), Dim::Param(NUM_SAMPLES.into())],
        );
        ModelProto {
            ir_version: IR_VERSION,
            opset_import: vec![OperatorSetIdProto {
                domain: String::new(),
                version: OPSET_VERSION,
            }],
            graph: Some(g.build("t")),
            ..Default::default()
        }
    }

    fn graph_mut(model: &mut ModelProto) -> &mut GraphProto {
        model.graph.as_mut().unwrap()
    }

    #[test]
    fn test_valid_model_passes() {
        GraphChecker::kokoro(8).check(&valid_model()).unwrap();
    }

    #[test]
    fn test_missing_input_rejected() {
        let mut model = valid_model();
        graph_mut(&mut model).input.retain(|i| i.name != SPEED);
        let err = GraphChecker::kokoro(8).check(&model).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_wrong_style_width_rejected() {
        assert!(GraphChecker::kokoro(256).check(&valid_model()).is_err());
    }

    #[test]
    fn test_dangling_edge_rejected() {
        let mut model = valid_model();
        graph_mut(&mut model).node.insert(
            0,
            NodeProto {
                input: vec!["nowhere".into()],
                output: vec!["x".into()],
                name: "bad".into(),
                op_type: "Relu".into(),
                ..Default::default()
            },
        );
        let err = GraphChecker::kokoro(8).check(&model).unwrap_err();
        assert!(err.to_string().contains("nowhere"));
    }

    #[test]
    fn test_unknown_op_rejected() {
        let mut model = valid_model();
        graph_mut(&mut model).node[0].op_type = "FancyAttention".into();
        let err = GraphChecker::kokoro(8).check(&model).unwrap_err();
        assert!(err.to_string().contains("FancyAttention"));
    }

    #[test]
    fn test_duplicate_output_rejected() {
        let mut model = valid_model();
        let graph = graph_mut(&mut model);
        let dup = graph.node[0].clone();
        let identity = graph.node.pop().unwrap();
        graph.node.push(dup);
        graph.node.push(identity);
        let err = GraphChecker::kokoro(8).check(&model).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_opset_mismatch_rejected() {
        let mut model = valid_model();
        model.opset_import[0].version = 11;
        assert!(GraphChecker::kokoro(8).check(&model).is_err());
        model.graph = None;
        assert!(GraphChecker::kokoro(8).check(&model).is_err());
    }

    #[test]
    fn test_truncated_initializer_rejected() {
        let mut model = valid_model();
        graph_mut(&mut model).initializer[0].raw_data.pop();
        let err = GraphChecker::kokoro(8).check(&model).unwrap_err();
        assert!(err.to_string().contains("stores"));
    }
}
