use avgq::frame::{encode, FrameLayout};
use avgq::{
    ArrayEpoch, ArrayEpochSource, AvgQ, AvgQConfig, AvgQError, AvgQFile, EpochSource,
    FileEpochSource, QueryValue, Script, Trigger, TriggerPoint,
};
use std::io::Cursor;

type TestSession = AvgQ<Vec<u8>, Cursor<Vec<u8>>>;

// 创建带预设响应的会话的辅助函数
fn create_session(response: &[u8]) -> TestSession {
    let mut bytes = response.to_vec();
    bytes.extend_from_slice(b"End of script\n");
    AvgQ::from_streams(Vec::new(), Cursor::new(bytes), AvgQConfig::default())
}

// 读取已发送脚本的辅助函数
fn sent_text(session: &TestSession) -> String {
    String::from_utf8_lossy(session.input().unwrap()).into_owned()
}

#[test]
fn test_description_list_followed_by_scalar() {
    let mut avgq = create_session(b"channelnames=Fp1\nFp2\nO1\nsfreq=256\n");
    let file = AvgQFile::new("sub01.cnt").unwrap();

    let values = avgq.get_description(&file, &["channelnames", "sfreq"]).unwrap();
    assert_eq!(values.len(), 2);
    assert_eq!(values[0].as_list().unwrap(), &["Fp1", "Fp2", "O1"]);
    assert_eq!(values[1], QueryValue::Float(256.0));

    assert_eq!(
        sent_text(&avgq),
        "read_synamps -c -e 1 sub01.cnt 0 1\n\
         query -N channelnames stdout\n\
         query -N sfreq stdout\n\
         null_sink\n-\n\
         \n!echo -F stdout End of script\\n\nnull_sink\n-\n"
    );
}

#[test]
fn test_description_single_value() {
    let mut avgq = create_session(b"points_in_file=720000\n");
    let file = AvgQFile::new("night.vhdr").unwrap();
    let value = avgq.get_description_value(&file, "points_in_file").unwrap();
    assert_eq!(value.as_i64(), Some(720000));
    assert!(sent_text(&avgq).starts_with("read_brainvision -c -e 1 night.vhdr 0 1\n"));
}

#[test]
fn test_description_failures() {
    // 引擎读不了文件时没有输出
    let mut avgq = create_session(b"");
    let file = AvgQFile::new("missing.cnt").unwrap();
    assert!(matches!(
        avgq.get_description(&file, &["sfreq"]),
        Err(AvgQError::MissingQueryResult(name)) if name == "sfreq"
    ));

    let mut avgq = create_session(b"nr_of_points=many\n");
    assert!(matches!(
        avgq.get_description(&file, &["nr_of_points"]),
        Err(AvgQError::MalformedResponse(_))
    ));
}

#[test]
fn test_session_usable_after_failed_query() {
    let mut bytes = b"nr_of_points=x\nEnd of script\nsfreq=100\n".to_vec();
    bytes.extend_from_slice(b"End of script\n");
    let mut avgq = AvgQ::from_streams(Vec::new(), Cursor::new(bytes), AvgQConfig::default());
    let file = AvgQFile::new("a.cnt").unwrap();

    assert!(avgq.get_description(&file, &["nr_of_points"]).is_err());
    let sfreq = avgq.get_description_value(&file, "sfreq").unwrap();
    assert_eq!(sfreq.as_f64(), Some(100.0));
}

#[test]
fn test_filetriggers_and_breakpoints() {
    let mut avgq =
        create_session(b"# Sfreq=500\n0\t256\n1000\t1\tStim\n90000\t257\n120000.4\t256\n");
    let file = AvgQFile::new("night.cnt").unwrap();
    let breakpoints = avgq.get_breakpoints(&file).unwrap();
    assert_eq!(breakpoints, vec![90000, 120000]);
    assert!(sent_text(&avgq).starts_with(
        "read_synamps -c -e 1 -T night.cnt 0 1\nquery filetriggers_for_trigfile stdout\nnull_sink\n-\n"
    ));
}

#[test]
fn test_filetriggers_of_epoched_file() {
    let mut avgq = create_session(b"1\nStandard\n2\nDeviant\n1\nStandard\n");
    let file = AvgQFile::new("grand.asc").unwrap();
    let trgfile = avgq.get_filetriggers(&file).unwrap();
    assert_eq!(
        trgfile.triggers(),
        &[
            Trigger::new(0.0, 1).with_description("Standard"),
            Trigger::new(1.0, 2).with_description("Deviant"),
            Trigger::new(2.0, 1).with_description("Standard"),
        ]
    );
    assert!(sent_text(&avgq)
        .starts_with("readasc grand.asc\nquery condition stdout\nquery comment stdout\n"));
}

#[test]
fn test_script_mixes_file_and_array_sources() {
    let mut avgq = create_session(b"nrofaverages=3\n");

    let mut file_source = FileEpochSource::open("sub01.cnt", 10, 50).unwrap();
    file_source
        .set_trigpoints(vec![TriggerPoint::from((100.0, 1)), TriggerPoint::from((300.0, 2, "odd"))])
        .unwrap();

    let epoch = ArrayEpoch::new(2, 1, vec![0.25, -0.25]).unwrap().with_sfreq(50.0);
    let array_source = ArrayEpochSource::new(vec![epoch]);

    let mut script = Script::new();
    script.add_epochsource(file_source);
    script.add_epochsource(array_source);
    script.set_collect("average");
    script.add_postprocess("query -N nrofaverages stdout");
    let lines: Vec<String> = script.runrdr(&mut avgq).unwrap().map(|l| l.unwrap()).collect();
    assert_eq!(lines, vec!["nrofaverages=3"]);

    let mut expected = b"read_synamps -R stdin sub01.cnt 10 50\n\
read_generic -c -s 50 -C 1 -e 1 stdin 0 2 float32\n\
average\n\
Post:\n\
query -N nrofaverages stdout\n\
-\n\
100\t1\n300\t2\todd\n0\t0\n"
        .to_vec();
    expected.extend(encode(&FrameLayout::new(2, 1), None, &[0.25, -0.25]).unwrap());
    expected.extend_from_slice(b"\n!echo -F stdout End of script\\n\nnull_sink\n-\n");
    assert_eq!(avgq.input().unwrap(), &expected);
}

#[test]
fn test_contract_violations_send_nothing() {
    let mut avgq = create_session(b"");

    let mut script = Script::new();
    assert!(matches!(script.run(&mut avgq), Err(AvgQError::NoEpochSource)));

    let mut source = FileEpochSource::open("a.cnt", 0, 10).unwrap();
    source.set_trigfile("a.trg").unwrap();
    assert!(matches!(
        source.set_trigpoint(TriggerPoint::from(5)),
        Err(AvgQError::ConflictingTriggerSource)
    ));

    let mut array_source = ArrayEpochSource::default();
    assert!(matches!(
        array_source.set_trigpoint(TriggerPoint::from(5)),
        Err(AvgQError::Unsupported(_))
    ));

    assert!(sent_text(&avgq).is_empty());
}

#[test]
fn test_read_epochs_with_itemsize() {
    // 两通道，每通道两个分量
    let layout = FrameLayout::new(2, 2).with_itemsize(2).with_xdata(true);
    let data = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
    let mut response = b"Epoch Dataset\nC3\t-1\t0\t0\nC4\t1\t0\t0\ncomment=spectrum\nsfreq=1\nnr_of_points=2\nitemsize=2\nData:\n".to_vec();
    response.extend(encode(&layout, Some(&[0.0, 1.0][..]), &data).unwrap());
    let mut avgq = create_session(&response);

    let mut script = Script::new();
    script.add_epochsource(FileEpochSource::open("a.cnt", 0, 2).unwrap());
    script.set_collect("average");
    script.add_postprocess("fftspect 0 1 1");
    let epochs = script.read_epochs(&mut avgq).unwrap();

    assert_eq!(epochs.len(), 1);
    let epoch = &epochs[0];
    assert_eq!(epoch.itemsize, 2);
    assert_eq!(epoch.nr_of_channels, 2);
    assert_eq!(epoch.channelpos[0], [-1.0, 0.0, 0.0]);
    assert_eq!(epoch.sample(1, 1), Some(7.0));
    assert_eq!(epoch.data, data);
    assert_eq!(script.postprocess(), &["fftspect 0 1 1"]);
}
