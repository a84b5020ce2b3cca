use rand::seq::SliceRandom;
use rand::thread_rng;
use tch::{Kind, Tensor};

use crate::error::{Result, TrainerError};

/// One `(inputs, targets)` pair.
pub type Batch = (Tensor, Tensor);

/// Finite, restartable source of batches; every call to `batches` starts a
/// new pass over the data.
pub trait DataSource {
    fn batch_size(&self) -> usize;

    fn n_classes(&self) -> usize;

    fn batches(&mut self) -> Box<dyn Iterator<Item = Result<Batch>> + '_>;
}

/// Labelled sequences held in memory.
pub struct SequenceDataset {
    inputs: Tensor,
    targets: Tensor,
    n_classes: usize,
    batch_size: usize,
    shuffle: bool,
}

impl SequenceDataset {
    /// inputs: [n_samples, seq_len, n_features]
    /// targets: [n_samples, seq_len], one class id per timestep
    pub fn new(
        inputs: Tensor,
        targets: Tensor,
        n_classes: usize,
        batch_size: usize,
        shuffle: bool,
    ) -> Result<Self> {
        let (n, t, _) = inputs.size3()?;
        let (tn, tt) = targets.size2()?;
        if n != tn || t != tt {
            return Err(TrainerError::Other(anyhow::anyhow!(
                "inputs {:?} and targets {:?} disagree on samples or sequence length",
                inputs.size(),
                targets.size()
            )));
        }
        if batch_size == 0 {
            return Err(TrainerError::Other(anyhow::anyhow!("batch size must be positive")));
        }

        Ok(Self {
            inputs: inputs.to_kind(Kind::Float),
            targets: targets.to_kind(Kind::Int64),
            n_classes,
            batch_size,
            shuffle,
        })
    }

    pub fn len(&self) -> usize {
        self.inputs.size()[0] as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_batches(&self) -> usize {
        self.len().div_ceil(self.batch_size)
    }
}

impl DataSource for SequenceDataset {
    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn batches(&mut self) -> Box<dyn Iterator<Item = Result<Batch>> + '_> {
        let mut order: Vec<i64> = (0..self.len() as i64).collect();
        if self.shuffle {
            order.shuffle(&mut thread_rng());
        }
        let chunks: Vec<Vec<i64>> = order.chunks(self.batch_size).map(<[i64]>::to_vec).collect();

        Box::new(chunks.into_iter().map(move |chunk| {
            let index = Tensor::from_slice(&chunk);
            let inputs = self.inputs.f_index_select(0, &index)?;
            let targets = self.targets.f_index_select(0, &index)?;
            Ok((inputs, targets))
        }))
    }
}
