//! SQL 探针采集器公共模块
//!
//! 提供采集器各组件共享的功能：
//! - 错误类型
//! - 运行时配置
//! - 探针配置与结果模型
//! - 标识符校验与 INSERT 模板展开

pub mod config;
pub mod errors;
pub mod models;
pub mod utils;
