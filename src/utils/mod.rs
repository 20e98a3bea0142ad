pub mod async_task;
