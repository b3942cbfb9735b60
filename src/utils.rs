/// 匹配 `name=value` 形式的响应行
///
/// The name must not contain `=` and neither part may be empty; the value
/// keeps everything after the first `=`.
pub fn split_query_line(line: &str) -> Option<(&str, &str)> {
    let (name, value) = line.split_once('=')?;
    if name.is_empty() || value.is_empty() {
        return None;
    }
    Some((name, value))
}

/// 转义文件名中的空格，引擎以空格分隔参数
pub fn escape_filename(filename: &str) -> String {
    filename.replace(' ', "\\ ")
}

/// 给分支脚本行加上 `>` 前缀；空行返回 None
pub fn branch_line(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if line.starts_with('>') {
        Some(line.to_string())
    } else {
        Some(format!(">{}", line))
    }
}

/// 去掉行尾的 `\r\n`
pub fn strip_line_ending(line: &str) -> &str {
    line.trim_end_matches(['\r', '\n'])
}
