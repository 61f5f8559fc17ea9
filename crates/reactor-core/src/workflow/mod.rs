pub mod context;
pub mod dag;
pub mod tcr;

pub use context::WorkflowContext;
pub use dag::{run_dag_once, run_dag_workflow, topo_order, DagInput, DagOutcome, DagTask};
pub use tcr::{run_tcr, TcrInput, TcrResult};
