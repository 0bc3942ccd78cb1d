//! Declared parameters of the fuzz target and input (de)serialization.
//!
//! The signature is plain owned data living inside the fuzzer
//! configuration; nothing here is a process global. Enum parameters with an
//! identical `(start, size)` domain form a group, and equality conditions
//! are only meaningful within a group.

use tracing::warn;

use crate::bitvec::{EnumBitVec, EnumBitVecArray, ENUM_SIZE_MAX};
use crate::defs::{Args, Input};
use crate::error::SignatureError;

/// Kind of branch condition a tree edge starts out with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondKind {
    Enum,
    Numeric,
    Neglect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumParam {
    name: String,
    start: i64,
    size: usize,
    entries: Vec<String>,
}

impl EnumParam {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Render one concrete value, preferring the symbolic entry name.
    pub fn render(&self, value: i64) -> String {
        let idx = value - self.start;
        if idx >= 0 && (idx as usize) < self.entries.len() {
            self.entries[idx as usize].clone()
        } else {
            value.to_string()
        }
    }

    pub fn bitvec(&self) -> EnumBitVec {
        if self.entries.is_empty() {
            EnumBitVec::new(&self.name, self.start, self.size)
        } else {
            EnumBitVec::with_entries(&self.name, self.entries.clone())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumericParam {
    name: String,
}

impl NumericParam {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// All declared parameters, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputSignature {
    enum_params: Vec<EnumParam>,
    /// Indices into `enum_params`, grouped by identical `(start, size)`.
    enum_groups: Vec<Vec<usize>>,
    numeric_params: Vec<NumericParam>,
}

impl InputSignature {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_enum_entries(
        &mut self,
        name: impl Into<String>,
        entries: Vec<String>,
    ) -> Result<(), SignatureError> {
        let name = name.into();
        for (i, a) in entries.iter().enumerate() {
            if entries[i + 1..].contains(a) {
                return Err(SignatureError::DuplicateEntry {
                    name,
                    entry: a.clone(),
                });
            }
        }
        let size = entries.len();
        self.add_enum_param(EnumParam {
            name,
            start: 0,
            size,
            entries,
        })
    }

    pub fn add_enum_range(
        &mut self,
        name: impl Into<String>,
        start: i64,
        size: usize,
    ) -> Result<(), SignatureError> {
        self.add_enum_param(EnumParam {
            name: name.into(),
            start,
            size,
            entries: Vec::new(),
        })
    }

    fn add_enum_param(&mut self, param: EnumParam) -> Result<(), SignatureError> {
        if param.size == 0 {
            return Err(SignatureError::EmptyEnum { name: param.name });
        }
        if param.size > ENUM_SIZE_MAX {
            return Err(SignatureError::EnumTooWide {
                name: param.name,
                size: param.size,
            });
        }
        self.check_fresh(&param.name)?;

        let idx = self.enum_params.len();
        let group = self.enum_groups.iter().position(|g| {
            let head = &self.enum_params[g[0]];
            head.start == param.start && head.size == param.size
        });
        match group {
            Some(g) => self.enum_groups[g].push(idx),
            None => self.enum_groups.push(vec![idx]),
        }
        self.enum_params.push(param);
        Ok(())
    }

    pub fn add_numeric(&mut self, name: impl Into<String>) -> Result<(), SignatureError> {
        let name = name.into();
        self.check_fresh(&name)?;
        self.numeric_params.push(NumericParam { name });
        Ok(())
    }

    fn check_fresh(&self, name: &str) -> Result<(), SignatureError> {
        let clash = self.enum_params.iter().any(|p| p.name == name)
            || self.numeric_params.iter().any(|p| p.name == name);
        if clash {
            Err(SignatureError::DuplicateParam(name.to_string()))
        } else {
            Ok(())
        }
    }

    pub fn enum_params(&self) -> &[EnumParam] {
        &self.enum_params
    }

    pub fn numeric_params(&self) -> &[NumericParam] {
        &self.numeric_params
    }

    /// Enum parameters grouped by identical domains.
    pub fn enum_groups(&self) -> Vec<Vec<&EnumParam>> {
        self.enum_groups
            .iter()
            .map(|g| g.iter().map(|&i| &self.enum_params[i]).collect())
            .collect()
    }

    pub fn enum_param_names(&self) -> Vec<String> {
        self.enum_params.iter().map(|p| p.name.clone()).collect()
    }

    pub fn numeric_param_names(&self) -> Vec<String> {
        self.numeric_params.iter().map(|p| p.name.clone()).collect()
    }

    pub fn num_enum_params(&self) -> usize {
        self.enum_params.len()
    }

    pub fn num_numeric_params(&self) -> usize {
        self.numeric_params.len()
    }

    pub fn num_params(&self) -> usize {
        self.enum_params.len() + self.numeric_params.len()
    }

    /// Name of the parameter at a flat positional index (enums first), as
    /// used by the `--constraint "argN..."` surface.
    pub fn param_name_at(&self, idx: usize) -> Option<&str> {
        if idx < self.enum_params.len() {
            Some(&self.enum_params[idx].name)
        } else {
            self.numeric_params
                .get(idx - self.enum_params.len())
                .map(|p| p.name.as_str())
        }
    }

    /// New tree edges learn enum conditions first when any enum parameter
    /// exists, otherwise numeric ones.
    pub fn default_cond_kind(&self) -> CondKind {
        if self.enum_params.is_empty() {
            CondKind::Numeric
        } else {
            CondKind::Enum
        }
    }

    /// One empty bitvector per enum parameter.
    pub fn empty_bitvecs(&self) -> EnumBitVecArray {
        EnumBitVecArray::new(self.enum_params.iter().map(|p| p.bitvec()).collect())
    }

    /// One full bitvector per enum parameter.
    pub fn full_bitvecs(&self) -> EnumBitVecArray {
        let mut bvs = self.empty_bitvecs();
        bvs.set_all();
        bvs
    }

    /// Flatten an input into the serialized order: enum params in
    /// declaration order, then numeric params in declaration order.
    pub fn serialize(&self, input: &Input) -> Vec<i64> {
        let mut data = Vec::with_capacity(self.num_params());
        for p in &self.enum_params {
            data.push(input.enum_args()[&p.name]);
        }
        for p in &self.numeric_params {
            data.push(input.numeric_args()[&p.name]);
        }
        data
    }

    /// Rebuild an input from the serialized order. Too few values is an
    /// error; extras are truncated with a warning.
    pub fn deserialize(&self, data: &[i64]) -> Result<Input, SignatureError> {
        if data.len() < self.num_params() {
            return Err(SignatureError::ShortInput {
                expected: self.num_params(),
                found: data.len(),
            });
        }
        if data.len() > self.num_params() {
            warn!(
                expected = self.num_params(),
                found = data.len(),
                "serialized input longer than the signature; truncating"
            );
        }

        let mut enum_args = Args::new();
        let mut numeric_args = Args::new();
        for (i, p) in self.enum_params.iter().enumerate() {
            enum_args.insert(p.name.clone(), data[i]);
        }
        for (i, p) in self.numeric_params.iter().enumerate() {
            numeric_args.insert(p.name.clone(), data[self.enum_params.len() + i]);
        }
        Ok(Input::new(enum_args, numeric_args))
    }

    /// Render an input with entry names where available.
    pub fn render_input(&self, input: &Input) -> String {
        let mut parts = Vec::with_capacity(self.num_params());
        for p in &self.enum_params {
            parts.push(p.render(input.enum_args()[&p.name]));
        }
        for p in &self.numeric_params {
            parts.push(input.numeric_args()[&p.name].to_string());
        }
        format!("({})", parts.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signature() -> InputSignature {
        let mut sig = InputSignature::new();
        sig.add_enum_entries("mode", vec!["read".into(), "write".into()])
            .unwrap();
        sig.add_enum_range("level", 0, 2).unwrap();
        sig.add_numeric("count").unwrap();
        sig
    }

    #[test]
    fn groups_by_identical_domain() {
        let sig = signature();
        // `mode` and `level` share (start=0, size=2), so they group.
        let groups = sig.enum_groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 2);
    }

    #[test]
    fn distinct_domains_do_not_group() {
        let mut sig = signature();
        sig.add_enum_range("wide", 0, 5).unwrap();
        assert_eq!(sig.enum_groups().len(), 2);
    }

    #[test]
    fn duplicate_names_rejected_across_kinds() {
        let mut sig = signature();
        assert!(matches!(
            sig.add_numeric("mode"),
            Err(SignatureError::DuplicateParam(_))
        ));
        assert!(matches!(
            sig.add_enum_range("count", 0, 2),
            Err(SignatureError::DuplicateParam(_))
        ));
    }

    #[test]
    fn serialize_round_trips() {
        let sig = signature();
        let input = sig.deserialize(&[1, 0, -17]).unwrap();
        assert_eq!(sig.serialize(&input), vec![1, 0, -17]);
        assert_eq!(sig.deserialize(&sig.serialize(&input)).unwrap(), input);
    }

    #[test]
    fn short_input_is_an_error_long_input_truncates() {
        let sig = signature();
        assert!(matches!(
            sig.deserialize(&[1, 0]),
            Err(SignatureError::ShortInput {
                expected: 3,
                found: 2
            })
        ));
        let long = sig.deserialize(&[1, 0, -17, 99, 98]).unwrap();
        assert_eq!(sig.serialize(&long), vec![1, 0, -17]);
    }

    #[test]
    fn render_prefers_entry_names() {
        let sig = signature();
        let input = sig.deserialize(&[1, 0, 5]).unwrap();
        assert_eq!(sig.render_input(&input), "(write,0,5)");
    }
}
