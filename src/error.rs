use thiserror::Error;

use super::task::TaskId;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
	#[error("task runner dropped before delivering a result <id='{0}'>")]
	TaskJoin(TaskId),
	#[error("shared value owner was released")]
	ValueReleased,
}
