use super::{BuildContext, BuildError, Process, StepContext};
use crate::partition::Partition;

/// Moves every individual one age up, accumulating in the plus group.
pub struct Ageing {
    label: String,
    categories: Vec<usize>,
    plus_group: bool,
}

impl Ageing {
    pub fn new(label: &str, categories: &[String], ctx: &BuildContext) -> Result<Self, BuildError> {
        let categories = categories
            .iter()
            .map(|cat| ctx.category(cat))
            .collect::<Result<_, _>>()?;
        Ok(Self {
            label: label.to_string(),
            categories,
            plus_group: ctx.partition.plus_group,
        })
    }
}

impl Process for Ageing {
    fn label(&self) -> &str {
        &self.label
    }

    fn execute(&mut self, _ctx: &mut StepContext, partition: &mut Partition) {
        for &i_cat in &self.categories {
            let data = &mut partition.categories[i_cat].data;
            let Some(&oldest) = data.last() else {
                continue;
            };
            data.rotate_right(1);
            data[0] = 0.0;
            if self.plus_group {
                if let Some(last) = data.last_mut() {
                    *last += oldest;
                }
            }
        }
    }
}
