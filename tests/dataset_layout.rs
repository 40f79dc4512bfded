mod common;

use std::fs;

use waste_sorter_lib::ml::dataset::WasteDataset;
use waste_sorter_lib::ml::{class_index, CLASS_NAMES};
use waste_sorter_lib::WasteSorterError;

#[test]
fn labels_follow_directory_names() {
    let temp = tempfile::tempdir().unwrap();
    let data_dir = common::write_dataset(temp.path(), 2);

    let dataset = WasteDataset::from_directory(&data_dir).unwrap();
    assert_eq!(dataset.samples().len(), 2 * CLASS_NAMES.len());
    for item in dataset.samples() {
        let dir_name = item
            .path
            .parent()
            .and_then(|p| p.file_name())
            .unwrap()
            .to_string_lossy()
            .to_string();
        assert_eq!(class_index(&dir_name), Some(item.label));
    }
}

#[test]
fn missing_class_directory_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let data_dir = common::write_dataset(temp.path(), 1);
    fs::remove_dir_all(data_dir.join("metal")).unwrap();

    let err = WasteDataset::from_directory(&data_dir).unwrap_err();
    match err.downcast_ref::<WasteSorterError>() {
        Some(WasteSorterError::MissingClassDirectory { label, .. }) => assert_eq!(label, "metal"),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn unknown_class_directory_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let data_dir = common::write_dataset(temp.path(), 1);
    fs::create_dir_all(data_dir.join("styrofoam")).unwrap();

    let err = WasteDataset::from_directory(&data_dir).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<WasteSorterError>(),
        Some(WasteSorterError::UnknownClassDirectory { name, .. }) if name == "styrofoam"
    ));
}

#[test]
fn non_image_files_are_ignored() {
    let temp = tempfile::tempdir().unwrap();
    let data_dir = common::write_dataset(temp.path(), 1);
    fs::write(data_dir.join("glass").join("notes.txt"), "not an image").unwrap();

    let dataset = WasteDataset::from_directory(&data_dir).unwrap();
    assert_eq!(dataset.samples().len(), CLASS_NAMES.len());
}

#[test]
fn empty_dataset_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let data_dir = common::write_dataset(temp.path(), 0);

    let err = WasteDataset::from_directory(&data_dir).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<WasteSorterError>(),
        Some(WasteSorterError::EmptyDataset(_))
    ));
}

#[test]
fn split_partitions_loaded_images() {
    let temp = tempfile::tempdir().unwrap();
    let data_dir = common::write_dataset(temp.path(), common::PER_CLASS);

    let dataset = WasteDataset::from_directory(&data_dir).unwrap();
    let total = dataset.samples().len();
    let (train, valid) = dataset.split(0.34, 0).unwrap();

    assert_eq!(valid.samples().len(), 2 * CLASS_NAMES.len());
    assert_eq!(train.samples().len() + valid.samples().len(), total);
    assert!(train
        .samples()
        .iter()
        .all(|item| !valid.samples().contains(item)));
    assert_eq!(valid.class_counts(), [2; 6]);
}
