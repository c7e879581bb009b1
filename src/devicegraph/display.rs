use std::fmt::Display;

use super::Devicegraph;

impl Display for Devicegraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for dev in self.devices() {
            writeln!(f, "{}", dev.device())?;
        }
        for ((source, target), holder) in self.holders() {
            writeln!(f, "{} source-sid:{source} target-sid:{target}", holder.ops().classname())?;
        }
        Ok(())
    }
}
