//! 批处理最终结果.

use lymph_berry::config::AnalysisConfig;
use lymph_berry::pipeline::BatchResult;
use lymph_berry::report::describe_into;
use std::io::{self, Write};

/// 批处理最终结果.
pub struct StagingResult {
    config: AnalysisConfig,
    batch: BatchResult,
}

impl StagingResult {
    pub fn new(config: AnalysisConfig, batch: BatchResult) -> Self {
        Self { config, batch }
    }

    /// 失败的受试者个数.
    #[inline]
    pub fn failed(&self) -> usize {
        self.batch.failed()
    }

    /// 在终端打印每个受试者的摘要, 最后列出失败的受试者.
    pub fn analyze(&self) -> io::Result<()> {
        let stdout = io::stdout();
        let mut w = stdout.lock();
        self.describe_into(&mut w)?;
        w.flush()
    }

    fn describe_into<W: Write>(&self, w: &mut W) -> io::Result<()> {
        const S4: &str = "    ";

        utils::sep_to(&mut *w)?;
        for report in self.batch.reports() {
            describe_into(report, self.config.catalog(), w)?;
            writeln!(w)?;
            utils::sep_to(&mut *w)?;
        }

        writeln!(
            w,
            "Subjects: {} succeeded, {} failed",
            self.batch.succeeded(),
            self.batch.failed()
        )?;
        for (subject, e) in self.batch.failures() {
            writeln!(w, "{S4}{subject} [{}]: {e}", e.kind())?;
        }
        Ok(())
    }
}
