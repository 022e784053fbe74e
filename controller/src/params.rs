//! The editable, in-memory parameter collection.

use std::str::FromStr;

use comms::{GaussianParam, ParamSet, csv};

use crate::error::{Result, SessionError};

/// A single editable field of a primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamField {
    MeanX,
    MeanY,
    SigmaX,
    SigmaY,
    SigmaXY,
    Weight,
}

impl ParamField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MeanX => "meanX",
            Self::MeanY => "meanY",
            Self::SigmaX => "sigmaX",
            Self::SigmaY => "sigmaY",
            Self::SigmaXY => "sigmaXY",
            Self::Weight => "weight",
        }
    }
}

impl FromStr for ParamField {
    type Err = SessionError;

    /// Accepts both `meanX` and `mean_x` spellings, case-insensitively.
    fn from_str(s: &str) -> Result<Self> {
        let key: String = s
            .chars()
            .filter(|c| *c != '_')
            .flat_map(char::to_lowercase)
            .collect();

        match key.as_str() {
            "meanx" => Ok(Self::MeanX),
            "meany" => Ok(Self::MeanY),
            "sigmax" => Ok(Self::SigmaX),
            "sigmay" => Ok(Self::SigmaY),
            "sigmaxy" => Ok(Self::SigmaXY),
            "weight" => Ok(Self::Weight),
            _ => Err(SessionError::UnknownField(s.to_string())),
        }
    }
}

/// Holds the parameter collection the user edits, imports and exports.
///
/// The collection is replaced wholesale on fetch or import and never merged; single
/// fields are edited in place through [`ParameterStore::edit`].
#[derive(Debug, Clone, Default)]
pub struct ParameterStore {
    set: ParamSet,
}

impl ParameterStore {
    pub fn params(&self) -> &[GaussianParam] {
        &self.set.params
    }

    pub fn has_covariance(&self) -> bool {
        self.set.has_covariance
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// Discards the current collection in favour of `set`.
    pub fn replace(&mut self, set: ParamSet) {
        self.set = set;
    }

    pub fn clear(&mut self) {
        self.set = ParamSet::default();
    }

    /// Parses `raw` and writes it into one field of the primitive with `index`.
    ///
    /// # Errors
    /// * `UnknownParameter` if no primitive has `index`.
    /// * `InvalidEdit` if `raw` is not a finite number, or if the cross term is edited on
    ///   a collection without covariance.
    pub fn edit(&mut self, index: u32, field: ParamField, raw: &str) -> Result<()> {
        let invalid = || SessionError::InvalidEdit {
            index,
            field: field.as_str(),
            value: raw.to_string(),
        };

        let has_covariance = self.set.has_covariance;
        let param = self
            .set
            .params
            .iter_mut()
            .find(|p| p.index == index)
            .ok_or(SessionError::UnknownParameter(index))?;

        let value = raw
            .trim()
            .parse::<f32>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(invalid)?;

        match field {
            ParamField::MeanX => param.mean_x = value,
            ParamField::MeanY => param.mean_y = value,
            ParamField::SigmaX => param.sigma_x = value,
            ParamField::SigmaY => param.sigma_y = value,
            ParamField::SigmaXY if has_covariance => param.sigma_xy = Some(value),
            ParamField::SigmaXY => return Err(invalid()),
            ParamField::Weight => param.weight = value,
        }

        Ok(())
    }

    /// Encodes the collection as delimited text.
    pub fn export_csv(&self) -> String {
        csv::encode(&self.set.params, self.set.has_covariance)
    }

    /// Decodes delimited text without touching the store.
    ///
    /// # Errors
    /// `EmptyParameterSet` if the text holds no usable row.
    pub fn decode_csv(text: &str) -> Result<ParamSet> {
        Ok(csv::decode(text)?)
    }
}
